use std::str::FromStr;

use anyhow::Result;
use shakmaty::uci::UciMove;

pub fn parse_uci_move(move_str: &str) -> Result<UciMove> {
    let uci_move = UciMove::from_str(move_str.trim())?;

    Ok(uci_move)
}

/// Parses a whitespace-separated move list, e.g. a room history ("e2e4 e7e5 g1f3").
pub fn parse_uci_moves(move_str: &str) -> Result<Vec<UciMove>> {
    let uci_moves = move_str
        .split_whitespace()
        .map(|s| UciMove::from_str(s.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(uci_moves)
}

/// Reads the side-to-move field out of a FEN string.
/// Missing field falls back to white; all FENs we feed through here are
/// produced by the rules library, so the fallback is effectively unreachable.
pub fn side_to_move(fen: &str) -> shakmaty::Color {
    match fen.split_whitespace().nth(1) {
        Some("b") => shakmaty::Color::Black,
        _ => shakmaty::Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::Color;

    #[test]
    fn parses_single_move() {
        let mv = parse_uci_move(" e2e4 ").unwrap();
        assert_eq!(mv.to_string(), "e2e4");
    }

    #[test]
    fn parses_promotion_move() {
        let mv = parse_uci_move("e7e8q").unwrap();
        assert_eq!(mv.to_string(), "e7e8q");
    }

    #[test]
    fn parses_move_list() {
        let moves = parse_uci_moves("e2e4 e7e5 g1f3").unwrap();
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[2].to_string(), "g1f3");
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(parse_uci_move("castles!!").is_err());
    }

    #[test]
    fn reads_side_to_move_from_fen() {
        assert_eq!(
            side_to_move("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Color::White
        );
        assert_eq!(
            side_to_move("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"),
            Color::Black
        );
    }
}
