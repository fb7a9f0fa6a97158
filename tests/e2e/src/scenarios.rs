//! End-to-end test scenarios

pub mod ping_pong;
pub mod restart_recovery;
pub mod supervised_echo;

pub use ping_pong::PingPongTest;
pub use restart_recovery::RestartRecoveryTest;
pub use supervised_echo::SupervisedEchoTest;
