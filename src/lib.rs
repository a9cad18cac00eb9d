//! Donation-driven video request queue for livestreams.
//!
//! Viewers attach YouTube links to DonationAlerts donations; qualifying
//! videos are admitted into a playback queue the streamer controls. The
//! crate covers the OAuth token lifecycle, the realtime donation stream,
//! metadata filtering, and the queue state machine. Presentation is left
//! to the host application via [`services::EventSink`].

pub mod models;
pub mod services;
