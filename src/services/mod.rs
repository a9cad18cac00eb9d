pub mod admission;
pub mod auth;
pub mod encryption;
pub mod events;
pub mod queue;
pub mod realtime;
pub mod settings_manager;
pub mod youtube;

pub use admission::{spawn_donation_worker, AdmissionPipeline};
pub use auth::DonationAlertsAuth;
pub use events::EventSink;
pub use queue::QueueEngine;
pub use realtime::DonationListener;
pub use settings_manager::SettingsManager;
pub use youtube::YouTubeClient;
