//! # Wire Framing
//!
//! Defines the JSON frames exchanged on the control channel between the
//! relay server and a tunnel agent, plus the error vocabulary shared by
//! both sides. Every frame is a UTF-8 JSON object disambiguated by a
//! `type` field (see [`Frame`]); this crate owns only the shape of that
//! contract, not the transport it rides on.

mod error;
mod frame;

pub use error::ErrorKind;
pub use frame::{FieldMap, Frame, HttpRequestFrame, HttpResponseFrame};
