pub mod assessment;
pub mod campaigns;
pub mod chat;
pub mod resources;
pub mod session;
pub mod uploads;
