use clap::ValueEnum;
use forkchat_checkpoint::CheckpointBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliCheckpointBackend {
    Memory,
    Sqlite,
}

impl From<CliCheckpointBackend> for CheckpointBackend {
    fn from(value: CliCheckpointBackend) -> Self {
        match value {
            CliCheckpointBackend::Memory => CheckpointBackend::Memory,
            CliCheckpointBackend::Sqlite => CheckpointBackend::Sqlite,
        }
    }
}
