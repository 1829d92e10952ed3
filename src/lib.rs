pub mod bot {
    pub mod commands;
    pub mod receiver;
}
pub mod config;
pub mod engine {
    pub mod ollama;
    pub mod whisper;
}
pub mod error;
pub mod model {
    pub mod constants;
    pub mod transcript;
    pub mod types;
}
pub mod pipeline;
pub mod publish;
pub mod recorder {
    pub mod artifacts;
    pub mod registry;
    pub mod session;
}

pub use config::Config;
pub use error::Error;
