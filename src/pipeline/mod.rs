//! Pipeline stages for medical-notes extraction.
//!
//! Each submodule implements one step. Only [`resolve`] and [`llm`] touch the
//! network, and both do so through [`crate::backend::VisionBackend`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ resolve ──▶ dispatch ──▶ llm ◀──▶ retry ──▶ assemble
//! (files)   (catalog)   (seq/pool)  (per page)  (decide)  (blocks)
//!                                    │
//!                                  encode
//! ```
//!
//! 1. [`input`]    load files into ordered [`crate::page::Page`]s, sniffing MIME types
//! 2. [`resolve`]  choose the model once per run, with alternates for 404s
//! 3. [`dispatch`] run pages sequentially or through a bounded pool
//! 4. [`encode`]   validate page bytes and build the base64 request
//! 5. [`llm`]      call the backend, sleeping and retrying as [`retry`] decides
//! 6. [`retry`]    pure transition function of the per-page retry state machine
//! 7. [`postprocess`] deterministic cleanup of model text
//! 8. [`assemble`] classify lines into blocks, in ordinal order

pub mod assemble;
pub mod dispatch;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod resolve;
pub mod retry;
