//! Btm coin: one concrete protocol dialect on top of the engine

pub mod messages;
pub mod requests;
pub mod session_data;
pub mod share;
pub mod syncer;
pub mod template;
pub mod verifier;

pub use requests::BtmDecoder;
pub use session_data::{BtmSessionData, BtmSessionDataBuilder};
pub use share::BtmShare;
pub use syncer::BtmNodeSyncer;
pub use template::{BtmBlockTemplate, BtmJob};
pub use verifier::BtmVerifier;
