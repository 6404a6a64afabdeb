use std::collections::HashSet;

use rand::Rng;
use tracing::{debug, warn};

use crate::models::{Board, MINE, Pos};

/// Consecutive rejected samples tolerated per board cell before giving up.
const REJECTIONS_PER_CELL: usize = 16;

/// Plant up to `requested` mines on `board`, never on `click`, then store
/// every other cell's neighbor count.
///
/// Positions are drawn uniformly at random and rejected when they hit the
/// click or a position already chosen. Sampling stops once enough distinct
/// positions are collected or after `16 x cells` consecutive rejections.
/// Returns how many mines were actually planted.
pub fn plant_mines<R: Rng + ?Sized>(
    rng: &mut R,
    board: &mut Board,
    click: Pos,
    requested: u16,
) -> u16 {
    let cells = board.len();
    let target = usize::from(requested).min(cells.saturating_sub(1));
    let rejection_limit = cells * REJECTIONS_PER_CELL;

    let mut chosen: Vec<Pos> = Vec::with_capacity(target);
    let mut taken: HashSet<Pos> = HashSet::with_capacity(target);
    let mut rejections = 0;

    while chosen.len() < target {
        let candidate = Pos {
            x: rng.random_range(0..board.width()),
            y: rng.random_range(0..board.height()),
        };

        if candidate == click || !taken.insert(candidate) {
            rejections += 1;
            if rejections >= rejection_limit {
                warn!(
                    "Mine placement gave up after {} rejections: {} of {} planted",
                    rejections,
                    chosen.len(),
                    target
                );
                break;
            }
            continue;
        }

        chosen.push(candidate);
        rejections = 0;
    }

    for cell in board.cells_mut() {
        cell.value = 0;
    }

    for pos in &chosen {
        if let Some(cell) = board.get_mut(*pos) {
            cell.value = MINE;
        }
    }

    let positions: Vec<Pos> = board.cells().map(|cell| cell.pos).collect();
    for pos in positions {
        let count = count_adjacent_mines(board, pos);
        if let Some(cell) = board.get_mut(pos)
            && !cell.is_mine()
        {
            cell.value = count;
        }
    }

    debug!(
        "Planted {} mines on {}x{} board avoiding ({}, {})",
        chosen.len(),
        board.width(),
        board.height(),
        click.x,
        click.y
    );

    chosen.len() as u16
}

pub fn count_adjacent_mines(board: &Board, pos: Pos) -> i8 {
    board
        .neighbors(pos)
        .filter(|around| board.get(*around).is_some_and(|cell| cell.is_mine()))
        .count() as i8
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;

    fn mine_positions(board: &Board) -> Vec<Pos> {
        board
            .cells()
            .filter(|cell| cell.is_mine())
            .map(|cell| cell.pos)
            .collect()
    }

    #[test]
    fn eight_by_eight_keeps_click_clear() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut board = Board::new(8, 8);
        let click = Pos::new(4, 4);

        let planted = plant_mines(&mut rng, &mut board, click, 10);

        assert_eq!(planted, 10);
        assert_eq!(mine_positions(&board).len(), 10);
        assert!(!board.get(click).is_some_and(|cell| cell.is_mine()));
    }

    #[test]
    fn full_board_request_is_clamped() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut board = Board::new(3, 3);

        let planted = plant_mines(&mut rng, &mut board, Pos::new(1, 1), 50);

        assert_eq!(planted, 8);
        assert_eq!(board.get(Pos::new(1, 1)).map(|cell| cell.value), Some(8));
    }

    #[test]
    fn single_cell_board_gets_no_mines() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut board = Board::new(1, 1);

        assert_eq!(plant_mines(&mut rng, &mut board, Pos::new(0, 0), 1), 0);
        assert_eq!(board.get(Pos::new(0, 0)).map(|cell| cell.value), Some(0));
    }

    #[test]
    fn replanting_clears_previous_values() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut board = Board::new(6, 6);

        plant_mines(&mut rng, &mut board, Pos::new(0, 0), 30);
        let planted = plant_mines(&mut rng, &mut board, Pos::new(0, 0), 2);

        assert_eq!(planted, 2);
        assert_eq!(mine_positions(&board).len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn exact_count_and_true_neighbor_values(
            seed in any::<u64>(),
            width in 2usize..16,
            height in 2usize..16,
            mine_ratio in 0.01f64..0.99,
            click_x in 0usize..16,
            click_y in 0usize..16,
        ) {
            let cells = width * height;
            let mines = ((cells as f64 * mine_ratio) as usize).clamp(1, cells - 1) as u16;
            let click = Pos::new(click_x % width, click_y % height);
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut board = Board::new(width, height);

            let planted = plant_mines(&mut rng, &mut board, click, mines);

            prop_assert_eq!(planted, mines);
            prop_assert_eq!(mine_positions(&board).len(), usize::from(mines));
            prop_assert!(!board.get(click).unwrap().is_mine());

            for cell in board.cells().filter(|cell| !cell.is_mine()) {
                let expected = board
                    .neighbors(cell.pos)
                    .filter(|p| board.get(*p).unwrap().is_mine())
                    .count() as i8;
                prop_assert_eq!(cell.value, expected);
            }
        }
    }
}
