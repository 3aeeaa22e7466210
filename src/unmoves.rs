//! Retrograde move enumeration.
//!
//! An unmove takes back the last move of the side that is not on turn.
//! Captures and promotions are never taken back here, those predecessors
//! live in a different table and are handled by marking whole tables
//! dirty instead. Each unmove is reported once without en passant rights
//! and once per possible en passant file of the predecessor.

use shakmaty::{attacks, Bitboard, Board, Color, File, Rank, Role, Square};

use crate::chunk::{ep_pawn_rank, ep_pawn_square, next_ep_file_mask, prev_ep_file_mask};

/// A single retro move of the side not on turn. The predecessor position
/// arises by moving its piece from `to` back to `from` and giving the
/// move to the other side.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Unmove {
    pub role: Role,
    pub from: Square,
    pub to: Square,
    /// En passant file of the predecessor position.
    pub ep_file: Option<File>,
}

/// Calls `f` for every unmove of the position given by `board`, `turn`
/// and `ep_file`.
pub fn for_each_unmove<F: FnMut(Unmove)>(
    board: &Board,
    turn: Color,
    ep_file: Option<File>,
    mut f: F,
) {
    let mover = !turn;
    match ep_file {
        Some(file) => {
            // The only move that creates en passant rights is the double
            // pawn push, so it is also the only move to take back.
            let from = Square::from_coords(file, mover.fold_wb(Rank::Second, Rank::Seventh));
            let to = ep_pawn_square(mover, file);
            debug_assert!(board.piece_at(to) == Some(mover.pawn()));
            expand(board, turn, Role::Pawn, from, to, &mut f);
        }
        None => {
            let empty = !board.occupied();
            for role in [
                Role::King,
                Role::Queen,
                Role::Rook,
                Role::Bishop,
                Role::Knight,
            ] {
                for to in board.by_piece(role.of(mover)) {
                    let origins = attacks::attacks(to, role.of(mover), board.occupied()) & empty;
                    for from in origins {
                        expand(board, turn, role, from, to, &mut f);
                    }
                }
            }
            pawn_unmoves(board, turn, &mut f);
        }
    }
}

fn pawn_unmoves<F: FnMut(Unmove)>(board: &Board, turn: Color, f: &mut F) {
    let mover = !turn;
    let empty = !board.occupied();
    let back = mover.fold_wb(-8, 8);

    for to in board.by_piece(mover.pawn()) {
        let Some(from) = to.offset(back) else {
            continue;
        };
        if !empty.contains(from) {
            continue;
        }
        if !Bitboard::BACKRANKS.contains(from) {
            expand(board, turn, Role::Pawn, from, to, f);
        }
        if to.rank() == ep_pawn_rank(mover) {
            // Double push, both passed squares must be empty.
            if let Some(double_from) = to.offset(2 * back) {
                if empty.contains(double_from) {
                    expand(board, turn, Role::Pawn, double_from, to, f);
                }
            }
        }
    }
}

/// Reports the unmove itself and its en passant variants: any side to
/// move pawn on its double push rank with an adjacent predecessor pawn of
/// the moving side may carry en passant rights in the predecessor.
fn expand<F: FnMut(Unmove)>(
    board: &Board,
    turn: Color,
    role: Role,
    from: Square,
    to: Square,
    f: &mut F,
) {
    f(Unmove {
        role,
        from,
        to,
        ep_file: None,
    });

    let mover = !turn;
    let candidates =
        board.by_piece(turn.pawn()) & Bitboard::from_rank(ep_pawn_rank(turn));
    if candidates.is_empty() {
        return;
    }

    let mut predecessor_pawns = board.by_piece(mover.pawn()) & !Bitboard::from(to);
    if role == Role::Pawn {
        predecessor_pawns.add(from);
    }

    for ep_pawn in candidates {
        let file = ep_pawn.file();
        let adjacent = prev_ep_file_mask(turn, file) | next_ep_file_mask(turn, file);
        if !(predecessor_pawns & adjacent).is_empty() {
            f(Unmove {
                role,
                from,
                to,
                ep_file: Some(file),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use shakmaty::{fen::Fen, CastlingMode, Chess, FromSetup, Position, Setup};

    use super::*;
    use crate::chunk::ep_target_square;

    fn unmoves_of(fen: &str) -> Vec<Unmove> {
        let setup: Setup = fen.parse::<Fen>().unwrap().into_setup();
        let ep_file = setup.ep_square.map(|sq| sq.file());
        let mut result = Vec::new();
        for_each_unmove(&setup.board, setup.turn, ep_file, |unmove| {
            result.push(unmove)
        });
        result
    }

    /// Applies an unmove and checks that the original position is among
    /// the legal successors of the predecessor.
    fn check_consistency(fen: &str) {
        let setup: Setup = fen.parse::<Fen>().unwrap().into_setup();
        for unmove in unmoves_of(fen) {
            let mut board = setup.board.clone();
            let piece = board.remove_piece_at(unmove.to).unwrap();
            assert_eq!(piece.role, unmove.role);
            assert_eq!(piece.color, !setup.turn);
            board.set_piece_at(unmove.from, piece);

            let predecessor = Setup {
                board,
                turn: !setup.turn,
                ep_square: unmove.ep_file.map(|file| ep_target_square(setup.turn, file)),
                ..Setup::empty()
            };
            let Ok(pred) = Chess::from_setup(predecessor, CastlingMode::Standard) else {
                continue;
            };
            let reached = pred.legal_moves().iter().any(|m| {
                let mut next = pred.clone();
                next.play_unchecked(m);
                next.board() == &setup.board
            });
            assert!(reached, "unmove {:?} of {} not reversible", unmove, fen);
        }
    }

    #[test]
    fn test_rook_unmoves_respect_blockers() {
        let unmoves = unmoves_of("8/8/8/3k4/8/8/1K2R1r1/8 b - - 0 1");
        // The white rook on e2 cannot have come through the black rook on
        // g2 or its own king on b2.
        let rook_origins: Vec<Square> = unmoves
            .iter()
            .filter(|u| u.role == Role::Rook)
            .map(|u| u.from)
            .collect();
        assert!(rook_origins.contains(&Square::F2));
        assert!(rook_origins.contains(&Square::C2));
        assert!(!rook_origins.contains(&Square::H2));
        assert!(!rook_origins.contains(&Square::A2));
        assert!(unmoves.iter().any(|u| u.role == Role::King));
    }

    #[test]
    fn test_ep_position_has_single_predecessor() {
        // Black just played d7d5, white pawn on e5 may capture en passant.
        let unmoves = unmoves_of("8/8/8/3pP3/8/1k6/8/4K3 w - d6 0 2");
        assert_eq!(unmoves.len(), 1);
        assert_eq!(
            unmoves[0],
            Unmove {
                role: Role::Pawn,
                from: Square::D7,
                to: Square::D5,
                ep_file: None,
            }
        );
    }

    #[test]
    fn test_ep_rights_variants() {
        // White pawn on e4 beside a black pawn on d4: in the predecessor
        // of a black king move, black may still have had en passant
        // rights against the freshly double pushed e4 pawn.
        let unmoves = unmoves_of("8/8/8/8/3pP3/1k6/8/4K3 w - - 0 2");
        assert!(unmoves
            .iter()
            .any(|u| u.role == Role::King && u.ep_file == Some(File::E)));
        assert!(unmoves
            .iter()
            .any(|u| u.role == Role::King && u.ep_file.is_none()));
    }

    #[test]
    fn test_pawn_unmoves() {
        let unmoves = unmoves_of("8/8/8/1k6/4P3/8/8/4K3 b - - 0 1");
        let pawn: Vec<_> = unmoves.iter().filter(|u| u.role == Role::Pawn).collect();
        assert_eq!(pawn.len(), 2);
        assert!(pawn
            .iter()
            .any(|u| u.from == Square::E3 && u.to == Square::E4));
        assert!(pawn
            .iter()
            .any(|u| u.from == Square::E2 && u.to == Square::E4));
    }

    #[test]
    fn test_unmoves_are_reversible() {
        check_consistency("8/8/8/1k6/4P3/8/8/4K3 b - - 0 1");
        check_consistency("8/8/8/3k4/8/8/1K2R2r/8 b - - 0 1");
        check_consistency("8/8/8/3pP3/8/1k6/8/4K3 w - d6 0 2");
    }
}
