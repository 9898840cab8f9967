//! Protocol module.
//!
//! Message model (requests, success and error replies), the canonical
//! signing form and the per-format codec.
//!
//! ## Signing form
//!
//! Signatures cover a `:`-joined canonical string, never the wire bytes:
//! ```text
//! request: {client}:{method}:{id}:{nonce}:{timestamp}:{params}
//! reply:   {client}:{id}:{nonce}:{timestamp}:{result | error}
//! ```
//! Structured parts are compact JSON with sorted object keys. Only the
//! trailing structured part may contain `:`; client, method, nonce and string
//! ids carrying it are refused, which keeps the string unambiguous.

mod canonical;
mod codec;
mod format;
mod request;
mod response;

pub use canonical::canonical_json;
pub use codec::ProtocolCodec;
pub use format::WireFormat;
pub use request::{CallId, Params, Request, Seal, SIGNING_SEPARATOR};

pub(crate) use request::check_signing_field;
pub use response::{ErrorResponse, Response, SuccessResponse};
