//! The HTTP tracker client through which a torrent discovers peers.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use bytes::Buf;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::de;
use serde_derive::Deserialize;
use url::Url;

use crate::error::tracker::{Result, TrackerError};

pub mod announce;
pub mod response;

pub use self::{
    announce::{Announce, Event},
    response::Response,
};

/// Characters left unescaped in the binary query values.
const URL_ENCODE_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'~')
    .remove(b'.');

pub struct Tracker {
    client: Client,
    url: Url,
}

impl Tracker {
    pub fn new(url: Url) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Announces our progress and returns the tracker's answer. A response
    /// carrying a failure reason is turned into [`TrackerError::Failure`].
    pub async fn announce(&self, params: &Announce) -> Result<Response> {
        let mut query = vec![
            ("port", params.port.to_string()),
            ("downloaded", params.downloaded.to_string()),
            ("uploaded", params.uploaded.to_string()),
            ("left", params.left.to_string()),
            ("compact", "1".to_string()),
        ];
        if let Some(peer_count) = params.peer_count {
            query.push(("numwant", peer_count.to_string()));
        }
        if let Some(ip) = &params.ip {
            query.push(("ip", ip.to_string()));
        }
        if let Some(tracker_id) = &params.tracker_id {
            query.push(("trackerid", tracker_id.clone()));
        }
        if let Some(event) = &params.event {
            query.push(("event", event.as_str().to_string()));
        }

        // reqwest would escape the raw bytes as utf-8, so these two are
        // put in the url by hand
        let url = format!(
            "{}?info_hash={}&peer_id={}",
            self.url,
            percent_encode(&params.info_hash, URL_ENCODE_RESERVED),
            percent_encode(&params.peer_id, URL_ENCODE_RESERVED),
        );

        log::debug!("Announcing to {}", self.url);
        let body = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let resp: Response = serde_bencode::from_bytes(&body)?;
        if let Some(reason) = resp.failure_reason {
            return Err(TrackerError::Failure(reason));
        }
        if let Some(warning) = &resp.warning_message {
            log::warn!("Tracker {} warns: {}", self.url, warning);
        }
        log::debug!("Tracker {} returned {} peers", self.url, resp.peers.len());
        Ok(resp)
    }
}

pub(crate) fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    let secs: Option<u64> = de::Deserialize::deserialize(deserializer)?;
    Ok(secs.map(Duration::from_secs))
}

/// Trackers send peers either as one compact string of 6 byte entries or
/// as a list of dicts. Both end up as plain addresses; the peer ids of the
/// dict form are dropped, the handshake tells us those.
pub(crate) fn deserialize_peers<'de, D>(deserializer: D) -> Result<Vec<SocketAddr>, D::Error>
where
    D: de::Deserializer<'de>,
{
    struct Visitor;

    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Vec<SocketAddr>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a compact peer string or a list of peer dicts")
        }

        /// Four bytes of IPv4 address then two of port, both big endian.
        fn visit_bytes<E>(self, mut b: &[u8]) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            const ENTRY_LEN: usize = 6;
            if b.len() % ENTRY_LEN != 0 {
                return Err(E::custom("compact peer string length not a multiple of 6"));
            }
            let mut peers = Vec::with_capacity(b.len() / ENTRY_LEN);
            while b.has_remaining() {
                let ip = Ipv4Addr::from(b.get_u32());
                let port = b.get_u16();
                peers.push(SocketAddr::new(IpAddr::V4(ip), port));
            }
            Ok(peers)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            #[derive(Deserialize)]
            struct DictPeer {
                ip: String,
                port: u16,
            }

            let mut peers = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(DictPeer { ip, port }) = seq.next_element()? {
                // hostnames are skipped
                if let Ok(ip) = ip.parse() {
                    peers.push(SocketAddr::new(ip, port));
                }
            }
            Ok(peers)
        }
    }

    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::stats::TransferTotals;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn compact(peers: &[(Ipv4Addr, u16)]) -> Vec<u8> {
        let raw: Vec<u8> = peers
            .iter()
            .flat_map(|(ip, port)| {
                let mut entry = ip.octets().to_vec();
                entry.extend_from_slice(&port.to_be_bytes());
                entry
            })
            .collect();
        let mut encoded = format!("{}:", raw.len()).into_bytes();
        encoded.extend_from_slice(&raw);
        encoded
    }

    #[test]
    fn test_compact_peers() {
        let mut encoded = b"d5:peers".to_vec();
        encoded.extend(compact(&[
            (Ipv4Addr::new(192, 168, 0, 1), 8989),
            (Ipv4Addr::new(10, 0, 0, 2), 6881),
        ]));
        encoded.push(b'e');

        let resp: Response = serde_bencode::from_bytes(&encoded).unwrap();
        assert_eq!(
            resp.peers,
            vec![
                "192.168.0.1:8989".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:6881".parse().unwrap(),
            ]
        );
        assert_eq!(resp.peer_infos()[0].addr, resp.peers[0]);
        assert!(resp.peer_infos()[0].id.is_none());
    }

    #[test]
    fn test_truncated_compact_peers() {
        let encoded = b"d5:peers5:abcdee";
        assert!(serde_bencode::from_bytes::<Response>(encoded).is_err());
    }

    #[test]
    fn test_dict_peers() {
        let encoded = b"d5:peersl\
            d2:ip12:192.168.1.104:porti55123ee\
            d2:ip11:example.org4:porti1eee\
            e";
        let resp: Response = serde_bencode::from_bytes(encoded).unwrap();
        assert_eq!(resp.peers, vec!["192.168.1.10:55123".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_announce_from_totals() {
        let totals = TransferTotals {
            uploaded: 7,
            downloaded: 9,
            left: 100,
            peers_wanted: 0,
        };
        let announce = Announce::from_totals([1; 20], [2; 20], 6881, totals);
        assert_eq!(announce.left, 100);
        assert_eq!(announce.peer_count, None);
        assert!(announce.event.is_none());
    }

    #[tokio::test]
    async fn test_announce_returns_peers() {
        let mut server = mockito::Server::new_async().await;
        let peer_ip = Ipv4Addr::new(2, 156, 201, 254);

        let mut body = b"d8:completei5e10:incompletei3e8:intervali15e12:min intervali10e5:peers"
            .to_vec();
        body.extend(compact(&[(peer_ip, 49123)]));
        body.push(b'e');

        let mock = server
            .mock("GET", "/announce")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("info_hash".into(), "abcdefghij1234567890".into()),
                Matcher::UrlEncoded("peer_id".into(), "-BP0100-000000000000".into()),
                Matcher::UrlEncoded("port".into(), "6881".into()),
                Matcher::UrlEncoded("downloaded".into(), "1234".into()),
                Matcher::UrlEncoded("uploaded".into(), "42".into()),
                Matcher::UrlEncoded("left".into(), "100".into()),
                Matcher::UrlEncoded("numwant".into(), "3".into()),
                Matcher::UrlEncoded("compact".into(), "1".into()),
                Matcher::UrlEncoded("event".into(), "started".into()),
            ]))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let url = format!("{}/announce", server.url()).parse().unwrap();
        let tracker = Tracker::new(url);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(b"abcdefghij1234567890");
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(b"-BP0100-000000000000");
        let totals = TransferTotals {
            uploaded: 42,
            downloaded: 1234,
            left: 100,
            peers_wanted: 3,
        };
        let announce =
            Announce::from_totals(info_hash, peer_id, 6881, totals).with_event(Event::Started);

        let resp = tracker.announce(&announce).await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            resp,
            Response {
                interval: Some(Duration::from_secs(15)),
                min_interval: Some(Duration::from_secs(10)),
                seeder_count: Some(5),
                leecher_count: Some(3),
                peers: vec![SocketAddr::new(peer_ip.into(), 49123)],
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_announce_failure_reason() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("d14:failure reason15:unknown torrente")
            .create_async()
            .await;

        let tracker = Tracker::new(server.url().parse().unwrap());
        let announce = Announce::from_totals([0; 20], [0; 20], 1, TransferTotals::default());
        match tracker.announce(&announce).await {
            Err(TrackerError::Failure(reason)) => assert_eq!(reason, "unknown torrent"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
