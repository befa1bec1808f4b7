pub mod events;
pub mod intent;
