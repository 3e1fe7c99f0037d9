//! Engine and per-torrent configuration.
//!
//! Every field has a sensible default, so a partial configuration (e.g.
//! deserialized from a config file) only needs to name what it overrides.

use std::{path::PathBuf, time::Duration};

use rand::Rng;
use serde::de;
use serde_derive::Deserialize;

use crate::PeerId;

/// The default client id prefix, in the Azureus-style convention.
pub const CLIENT_ID_PREFIX: &[u8; 8] = b"-BP0100-";

/// The global configuration of the engine and the defaults for torrents
/// whose config is not overridden.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Conf {
    pub engine: EngineConf,
    pub torrent: TorrentConf,
}

/// Configuration related to the engine itself.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConf {
    /// The ID of the client to announce to trackers and other peers.
    pub client_id: PeerId,
    /// The port on which inbound peer connections are accepted.
    pub listen_port: u16,
}

impl Default for EngineConf {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            listen_port: 6881,
        }
    }
}

/// Configuration for a torrent's swarm and its peer sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TorrentConf {
    /// Below this many connected peers the swarm asks discovery for more.
    pub min_peers: usize,
    /// The swarm never holds more sessions than this.
    pub max_peers: usize,
    /// How many pieces a single peer may be downloading at once.
    pub max_pieces_per_peer: usize,
    /// The maximum number of block requests outstanding to one peer.
    pub request_window: usize,
    /// How often a keep-alive is sent to a handshaken peer.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub keep_alive_interval: Duration,
    /// A peer from which nothing is received for this long is dropped.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub keep_alive_timeout: Duration,
    /// How long an outbound connection attempt may take.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub connect_timeout: Duration,
    /// How often the torrent runs its timers.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub tick_interval: Duration,
    /// Where the resume bitfield is saved, if anywhere.
    pub resume_dir: Option<PathBuf>,
}

impl Default for TorrentConf {
    fn default() -> Self {
        Self {
            min_peers: 5,
            max_peers: 20,
            max_pieces_per_peer: 2,
            request_window: 5,
            keep_alive_interval: Duration::from_secs(120),
            keep_alive_timeout: Duration::from_secs(150),
            connect_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            resume_dir: None,
        }
    }
}

/// The shortest period any timer runs with.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Deserialize a positive integer representing seconds into `Duration`.
pub fn deserialize_seconds<'de, D>(
    deserializer: D,
) -> Result<Duration, D::Error>
where
    D: de::Deserializer<'de>,
{
    let secs: u64 = de::Deserialize::deserialize(deserializer)?;
    if secs == 0 {
        return Err(de::Error::invalid_value(
            de::Unexpected::Unsigned(0),
            &"a positive number of seconds",
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Generates a client id made of [`CLIENT_ID_PREFIX`] followed by 12 random
/// printable ASCII characters.
pub fn generate_client_id() -> PeerId {
    let mut rng = rand::thread_rng();
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_ID_PREFIX);
    for b in id[8..].iter_mut() {
        *b = rng.gen_range(b' '..=b'~');
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_printable_with_prefix() {
        let id = generate_client_id();
        assert_eq!(&id[..8], CLIENT_ID_PREFIX);
        assert!(id[8..].iter().all(|b| (b' '..=b'~').contains(b)));
    }

    #[test]
    fn test_defaults() {
        let conf = TorrentConf::default();
        assert_eq!(conf.min_peers, 5);
        assert_eq!(conf.max_peers, 20);
        assert_eq!(conf.max_pieces_per_peer, 2);
        assert_eq!(conf.request_window, 5);
        assert!(conf.keep_alive_interval < conf.keep_alive_timeout);
    }

    #[test]
    fn test_partial_torrent_conf() {
        let conf: TorrentConf =
            serde_bencode::from_bytes(b"d19:keep_alive_intervali30e9:max_peersi8ee").unwrap();
        assert_eq!(conf.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(conf.max_peers, 8);
        // the rest keeps its defaults
        assert_eq!(conf.min_peers, 5);
        assert_eq!(conf.tick_interval, Duration::from_secs(1));
        assert!(conf.resume_dir.is_none());
    }

    #[test]
    fn test_zero_seconds_rejected() {
        assert!(serde_bencode::from_bytes::<TorrentConf>(b"d13:tick_intervali0ee").is_err());
    }

    #[test]
    fn test_nested_conf() {
        let conf: Conf =
            serde_bencode::from_bytes(b"d6:engined11:listen_porti7000eee").unwrap();
        assert_eq!(conf.engine.listen_port, 7000);
        assert_eq!(&conf.engine.client_id[..8], CLIENT_ID_PREFIX);
        assert_eq!(conf.torrent.max_peers, 20);
    }
}
