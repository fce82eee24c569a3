pub mod roster_loader;
pub mod rubric_loader;

pub use roster_loader::load_roster;
pub use rubric_loader::load_rubric;
