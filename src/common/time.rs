mod clock;
mod instant;

pub use self::{
    clock::{Clock, FakeClock},
    instant::Instant,
};
