mod actor;

pub use actor::ActorContext;
