pub mod campaign;
pub mod channel;
pub mod settings;
pub mod status;

pub use campaign::{CampaignStatus, DropCampaign, Game, SessionProgress, TimeBasedDrop};
pub use channel::Channel;
pub use settings::MinerConfig;
pub use status::{Attribution, DropSnapshot, MinerStatus};
