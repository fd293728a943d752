//! The MCP operation catalog: one thin method per wire operation, each built from
//! [`super::Client::call`]/[`super::Client::call_raw`]/[`super::Client::notify_raw`] (§4.6).

mod completion;
mod handshake;
mod misc;
mod prompts;
mod resources;
mod tools;
