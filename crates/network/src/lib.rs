//! Session protocol and endpoint orchestration.
//!
//! The [`Server`] accepts a single client at a time, negotiates the audio
//! geometry, and feeds decoded frames into a playback sink; the [`Client`]
//! dials, negotiates, and streams captured frames with heartbeats in between.
//! Both ends talk to the audio crate only through its `Capture`/`Playback`
//! traits (constructed via factories after the handshake settles the
//! geometry), which is what lets the integration tests run without sound
//! hardware.
//!
//! # Task model
//!
//! Per session the server runs its packet loop plus two background tasks
//! (connection monitor, stats emitter); the client runs a writer task (audio
//! frames + heartbeats, the single writer for that direction), a reader
//! task, and a stats emitter. Every task selects on the session's
//! [`StopSignal`](utils::StopSignal) and the process
//! [`ShutdownCoordinator`](utils::ShutdownCoordinator); teardown joins
//! background tasks for at most three seconds and then proceeds.

pub mod client;
pub mod excitation;
pub mod server;
mod session;

pub use client::{CaptureFactory, Client};
pub use excitation::ExcitationGate;
pub use server::{PlaybackFactory, Server};
