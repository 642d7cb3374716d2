// quizpulse-common: presence model, derived views, and wire protocol shared
// by the relay and the CLI.

pub mod aggregate;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod views;
