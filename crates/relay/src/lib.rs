pub mod paced_emitter;
pub mod relay;
pub mod sse;
