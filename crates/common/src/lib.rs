// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 db-tunnel Contributors

// db-tunnel - Common Library
// SSH database tunnel orchestration: open, discover, list, kill, verify

pub mod error;
pub mod process;
pub mod sink;
pub mod tunnel;
pub mod verify;

pub use error::{Error, Result};
pub use process::{ProcessEntry, ProcessHost, SystemProcessHost};
pub use sink::{MemorySink, NullSink, StatusSink, StdoutSink};
pub use tunnel::{find_tunnel_pids, kill_tunnels, list_tunnels, open_tunnel, TunnelSpec};
pub use verify::{verify_tunnel, VerifyRequest, DEFAULT_VERIFY_QUERY, DEFAULT_VERIFY_TIMEOUT};
