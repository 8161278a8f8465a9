//! Language server front end for incwise: framing, protocol conversions,
//! and the document/diagnostics session.

pub mod codec;

mod protocol;
mod server;

pub use protocol::{
    FIX_ALL_COMMAND, FIX_FILE_COMMAND, PathToUriError, SOURCE, file_uri_to_path, path_to_file_uri,
};
pub use server::{ServerOptions, serve, serve_stdio};
