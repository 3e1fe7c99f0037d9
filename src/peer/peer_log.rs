//! Logging macros that prefix each line with the address of the peer the
//! session is talking to. They expect a `self` with an `info: PeerInfo`
//! field in scope.

macro_rules! peer_log {
    ($lvl:ident, $self:ident, $($arg:tt)+) => {
        log::$lvl!("[Peer {}] {}", $self.info.addr, format_args!($($arg)+))
    };
}

macro_rules! peer_info {
    ($self:ident, $($arg:tt)+) => { peer_log!(info, $self, $($arg)+) };
}

macro_rules! peer_debug {
    ($self:ident, $($arg:tt)+) => { peer_log!(debug, $self, $($arg)+) };
}

macro_rules! peer_warn {
    ($self:ident, $($arg:tt)+) => { peer_log!(warn, $self, $($arg)+) };
}

macro_rules! peer_trace {
    ($self:ident, $($arg:tt)+) => { peer_log!(trace, $self, $($arg)+) };
}
