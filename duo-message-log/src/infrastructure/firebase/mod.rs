pub mod realtime;
mod sse;
