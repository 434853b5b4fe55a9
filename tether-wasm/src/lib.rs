//! Browser support for Tether
//!
//! Exposes [`BrowserClient`] to JavaScript through `wasm-bindgen`. It runs the
//! same state machine, reconnect policy and dispatcher as the native client,
//! driven by the browser's `WebSocket` events and timers instead of a tokio
//! runtime.
//!
//! ```js
//! import init, { BrowserClient, BrowserOptions } from "tether-wasm";
//!
//! await init();
//! const options = new BrowserOptions();
//! options.autoReconnect = true;
//! const client = new BrowserClient(options);
//! client.setMessageCallback((msg) => console.log(msg));
//! client.connect("wss://chat.example.com/ws", token, "im_app_web");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tether-wasm/")]

pub mod client;
pub mod options;

pub use client::BrowserClient;
pub use options::BrowserOptions;

/// Prelude module
pub mod prelude {
    pub use crate::{BrowserClient, BrowserOptions};
    pub use tether_core::prelude::*;
}
