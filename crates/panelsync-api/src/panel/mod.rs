// Panel API client
//
// Transport mechanics in `client`, endpoint methods in `node`.

pub mod client;
mod node;

pub use client::PanelClient;
