pub mod diff;
pub mod digest;
pub mod inspect;
pub mod verify;
