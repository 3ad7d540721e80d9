//! Line-mode coding agent host.
//!
//! ## Provider bootstrap
//!
//! `coding_agent` selects its executor with `CODING_AGENT_PROVIDER`. Only `mock` is
//! available; it plays a deterministic script and is the default.
//!
//! ## Configuration
//!
//! Coordinator settings come from the `AGENT_SESSION_*` variables read by
//! `agent_session::CoordinatorConfig::from_env`. Logs go to stderr at `warn` unless
//! `AGENT_SESSION_LOG` (or `RUST_LOG`) says otherwise; set `AGENT_SESSION_LOG_FILE`
//! to append them to a file instead.
//!
//! Every non-command line is submitted to the selected session. Lines typed while a
//! task runs are queued and start in order once it settles.

pub mod commands;
pub mod console;
pub mod providers;
pub mod repl;
