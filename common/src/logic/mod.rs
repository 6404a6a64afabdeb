mod flood;
mod mines;

pub use flood::reveal_flood;
pub use mines::{count_adjacent_mines, plant_mines};
