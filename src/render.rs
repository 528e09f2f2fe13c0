//! Terminal board renderer for the binary

use anyhow::{Context, Result};
use crossterm::{
    cursor::MoveTo,
    execute,
    style::Stylize,
    terminal::{Clear, ClearType},
};
use std::io::{IsTerminal, Write};

use crate::scrapers::board::BoardView;

const RULE_WIDTH: usize = 30;

/// Format the board: asks top-down (highest first), mid line, then bids
pub fn render_board(view: &BoardView, color: bool) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();

    match (view.mid_price, view.spread) {
        (Some(_), Some(spread)) => out.push_str(&format!("Realtime LOB\nSpread: {:.2}\n", spread)),
        _ => out.push_str("Realtime LOB | Waiting for data...\n"),
    }
    out.push_str(&format!("{}\n{:>10} | {:>10}\n{}\n", rule, "Size", "Price", rule));

    for ask in view.asks.iter().rev() {
        let line = format!("{:>10.4} | {:>10.2}", ask.size, ask.price);
        if color {
            out.push_str(&format!("{}\n", line.red()));
        } else {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str(&format!("{}\n", rule));
    match view.mid_price {
        Some(mid) => out.push_str(&format!("{:>10} | {:>10.2}\n", "", mid)),
        None => out.push_str(&format!("{:>10} | {:>10}\n", "", "-")),
    }
    out.push_str(&format!("{}\n", rule));

    for bid in &view.bids {
        let line = format!("{:>10.4} | {:>10.2}", bid.size, bid.price);
        if color {
            out.push_str(&format!("{}\n", line.green()));
        } else {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str(&rule);
    out.push('\n');
    out
}

/// Clear the terminal and draw the board
pub fn print_board(view: &BoardView) -> Result<()> {
    let mut stdout = std::io::stdout();
    let color = stdout.is_terminal();
    if color {
        execute!(stdout, Clear(ClearType::All), MoveTo(0, 0)).context("Failed to clear terminal")?;
    }
    stdout
        .write_all(render_board(view, color).as_bytes())
        .context("Failed to write board")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::board::PriceLevel;
    use rust_decimal_macros::dec;

    #[test]
    fn test_render_waiting_board() {
        let out = render_board(&BoardView::default(), false);
        assert!(out.starts_with("Realtime LOB | Waiting for data..."));
    }

    #[test]
    fn test_render_orders_asks_above_bids() {
        let view = BoardView {
            bids: vec![PriceLevel::new(dec!(99), dec!(1.5))],
            asks: vec![
                PriceLevel::new(dec!(101), dec!(2)),
                PriceLevel::new(dec!(102), dec!(3)),
            ],
            mid_price: Some(dec!(100)),
            spread: Some(dec!(2)),
        };

        let out = render_board(&view, false);
        assert!(out.contains("Spread: 2.00"));

        let pos = |needle: &str| out.find(needle).unwrap();
        assert!(pos("102.00") < pos("101.00"));
        assert!(pos("101.00") < pos("100.00"));
        assert!(pos("100.00") < pos("99.00"));
        assert!(out.contains("1.5000"));
    }
}
