use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::Constraint,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Row, Table, TableState},
};
use std::io;

use crate::lib::output::ReportTable;
use crate::{OutputError, Result};

/// Show the report in an interactive, scrollable table
pub fn display_table(table: &ReportTable, title: &str) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, table, title);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res.map_err(|e| OutputError::Terminal(e.to_string()).into())
}

fn column_widths(table: &ReportTable) -> Vec<Constraint> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let widest = table
                .rows
                .iter()
                .filter_map(|row| row.get(i))
                .map(|value| value.chars().count())
                .max()
                .unwrap_or(0)
                .max(header.chars().count());
            Constraint::Length(u16::try_from(widest).unwrap_or(u16::MAX).saturating_add(1))
        })
        .collect()
}

/// Next row index when moving by `step`, wrapping at both ends
fn step_selection(selected: Option<usize>, len: usize, forward: bool) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match selected {
        Some(i) if forward => (i + 1) % len,
        Some(0) => len - 1,
        Some(i) => i - 1,
        None => 0,
    })
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    table: &ReportTable,
    title: &str,
) -> io::Result<()> {
    let mut state = TableState::default();
    state.select(step_selection(None, table.rows.len(), true));
    let widths = column_widths(table);

    loop {
        terminal.draw(|f| {
            let area = f.area();

            let header_cells = table.headers.iter().map(|h| {
                Cell::from(h.as_str()).style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            });
            let header = Row::new(header_cells)
                .style(Style::default().bg(Color::DarkGray))
                .height(1);

            let rows = table.rows.iter().map(|row| {
                let cells = row.iter().map(|value| Cell::from(value.as_str()));
                let style = if row.first().map(String::as_str) == Some("*") {
                    Style::default().add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                Row::new(cells).style(style).height(1)
            });

            let widget = Table::new(rows, widths.clone())
                .header(header)
                .block(Block::default().borders(Borders::ALL).title(title))
                .row_highlight_style(Style::default().bg(Color::DarkGray))
                .highlight_symbol(">> ");

            f.render_stateful_widget(widget, area, &mut state);
        })?;

        // Handle input
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Down | KeyCode::Char('j') => {
                        state.select(step_selection(state.selected(), table.rows.len(), true));
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        state.select(step_selection(state.selected(), table.rows.len(), false));
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_wraps_in_both_directions() {
        assert_eq!(step_selection(Some(2), 3, true), Some(0));
        assert_eq!(step_selection(Some(0), 3, false), Some(2));
        assert_eq!(step_selection(Some(1), 3, false), Some(0));
        assert_eq!(step_selection(None, 3, true), Some(0));
        assert_eq!(step_selection(Some(0), 0, true), None);
    }

    #[test]
    fn columns_fit_their_widest_value() {
        let table = ReportTable {
            headers: vec!["NODE".to_string(), "CPU REQUESTS".to_string()],
            rows: vec![vec!["worker-pool-a-1".to_string(), "5m (1%)".to_string()]],
        };
        assert_eq!(
            column_widths(&table),
            vec![Constraint::Length(16), Constraint::Length(13)]
        );
    }

    #[test]
    fn oversized_values_clamp_column_width() {
        let table = ReportTable {
            headers: vec!["POD".to_string()],
            rows: vec![vec!["x".repeat(70_000)], vec!["y".repeat(65_535)]],
        };
        assert_eq!(column_widths(&table), vec![Constraint::Length(u16::MAX)]);
    }
}
