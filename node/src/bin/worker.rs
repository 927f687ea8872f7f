// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Isolated hashing worker. Started by a host process, never by hand: it
//! talks framed RPC on stdin/stdout and logs to stderr.

#[tokio::main]
async fn main() {
    treehash_node::worker::init_logging();
    let code = treehash_node::worker::run_stdio().await;

    // The blocking stdin reader may still be parked; exit without waiting for it.
    std::process::exit(code);
}
