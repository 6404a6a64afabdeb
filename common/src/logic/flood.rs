use std::collections::VecDeque;

use crate::models::{Board, Pos};

/// Breadth-first reveal starting at a hidden zero-valued cell.
///
/// Returns the revealed positions in visitation order, starting with `start`.
/// Marked and already revealed cells are skipped; only zero-valued cells are
/// expanded further, so numbered cells form the border of the flood.
pub fn reveal_flood(board: &mut Board, start: Pos) -> Vec<Pos> {
    let mut revealed = Vec::new();
    let mut queue = VecDeque::new();

    match board.get_mut(start) {
        Some(cell) if cell.is_hidden() && !cell.is_marked() => cell.reveal(),
        _ => return revealed,
    }
    revealed.push(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for around in board.neighbors(current) {
            let Some(cell) = board.get_mut(around) else {
                continue;
            };

            if !cell.is_hidden() || cell.is_marked() {
                continue;
            }

            cell.reveal();
            revealed.push(around);

            if cell.value == 0 {
                queue.push_back(around);
            }
        }
    }

    revealed
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::logic::plant_mines;
    use crate::models::MINE;

    #[test]
    fn empty_board_reveals_everything_from_center() {
        let mut board = Board::new(3, 3);

        let revealed = reveal_flood(&mut board, Pos::new(1, 1));

        assert_eq!(revealed.len(), 9);
        assert_eq!(revealed[0], Pos::new(1, 1));
        assert!(board.cells().all(|cell| !cell.is_hidden()));
    }

    #[test]
    fn numbered_cells_stop_the_flood() {
        // Column x = 2 holds numbered cells next to a mine column at x = 3.
        let mut board = Board::new(4, 3);
        for y in 0..3 {
            board.get_mut(Pos::new(3, y)).unwrap().value = MINE;
            board.get_mut(Pos::new(2, y)).unwrap().value = if y == 1 { 3 } else { 2 };
        }

        let revealed = reveal_flood(&mut board, Pos::new(0, 0));

        assert_eq!(revealed.len(), 9);
        assert!(revealed.iter().all(|pos| pos.x < 3));
        assert!(board.get(Pos::new(3, 1)).unwrap().is_hidden());
    }

    #[test]
    fn marked_cells_are_left_alone() {
        let mut board = Board::new(3, 1);
        board.get_mut(Pos::new(2, 0)).unwrap().toggle_mark();

        let revealed = reveal_flood(&mut board, Pos::new(0, 0));

        assert_eq!(revealed, vec![Pos::new(0, 0), Pos::new(1, 0)]);
        let marked = board.get(Pos::new(2, 0)).unwrap();
        assert!(marked.is_hidden() && marked.is_marked());
    }

    #[test]
    fn visitation_is_breadth_first() {
        let mut board = Board::new(5, 1);

        let revealed = reveal_flood(&mut board, Pos::new(2, 0));

        assert_eq!(
            revealed,
            vec![
                Pos::new(2, 0),
                Pos::new(1, 0),
                Pos::new(3, 0),
                Pos::new(0, 0),
                Pos::new(4, 0),
            ]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn never_revisits_and_never_reveals_marked(
            seed in any::<u64>(),
            width in 2usize..20,
            height in 2usize..20,
            mines in 0u16..40,
            marks in proptest::collection::vec((0usize..20, 0usize..20), 0..12),
        ) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut board = Board::new(width, height);
            let click = Pos::new(0, 0);
            plant_mines(&mut rng, &mut board, click, mines);

            let mut marked = HashSet::new();
            for (x, y) in marks {
                let pos = Pos::new(x % width, y % height);
                if pos != click && marked.insert(pos) {
                    board.get_mut(pos).unwrap().toggle_mark();
                }
            }

            prop_assume!(board.get(click).unwrap().value == 0);
            let revealed = reveal_flood(&mut board, click);

            let unique: HashSet<Pos> = revealed.iter().copied().collect();
            prop_assert_eq!(unique.len(), revealed.len());
            prop_assert!(revealed.len() <= width * height);
            prop_assert!(revealed.iter().all(|pos| !marked.contains(pos)));
            prop_assert!(revealed.iter().all(|pos| !board.get(*pos).unwrap().is_mine()));

            // Every revealed cell other than the start borders a revealed zero.
            for pos in revealed.iter().skip(1) {
                let touches_zero = board.neighbors(*pos).any(|around| {
                    unique.contains(&around) && board.get(around).unwrap().value == 0
                });
                prop_assert!(touches_zero);
            }
        }
    }
}
