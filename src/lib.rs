pub mod alert;
pub mod bitfield;
pub mod blockinfo;
pub mod conf;
pub mod counter;
pub mod disk;
pub mod error;
pub mod peer;
pub mod piece_picker;
pub mod resume;
pub mod torrent;
pub mod tracker;

mod define;
pub use define::*;

pub use bitfield::Bitfield;
pub use blockinfo::BlockInfo;
