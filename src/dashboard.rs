// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Terminal output: the static board table printed before burn-in starts and
//! the live telemetry table redrawn while it runs.

use std::io::{self, Write};
use std::time::Duration;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, ContentArrangement};
use crossterm::tty::IsTty;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Cell, Paragraph, Row, Table};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};

use crate::board::{BoardDescriptor, BoardSample, Level, Reading, TelemetrySample};
use crate::session::{StopReason, StopSignal};

pub const STOP_PROMPT: &str =
    "Press Enter to STOP burn-in on all boards (close all other processes using the boards first)";

pub const STATIC_HEADERS: [&str; 5] = [
    "PCI Dev ID",
    "Device Series",
    "Board Type",
    "Board Number",
    "Coordinates",
];

pub const LIVE_HEADERS: [&str; 6] = [
    "ID",
    "Core Voltage (V)",
    "Core Current (A)",
    "AICLK (MHz)",
    "Power (W)",
    "Core Temp (°C)",
];

const LIVE_WIDTHS: [u16; 6] = [4, 16, 16, 12, 14, 14];

/// Borders, header row and footer around the board rows.
const LIVE_CHROME: u16 = 4;

const NOMINAL: Color = Color::Green;
const NEAR_LIMIT: Color = Color::Indexed(214);
const LIMIT_SUFFIX: Color = Color::Indexed(227);

/// `(width, precision)` of each metric column, in column order.
const METRIC_FORMATS: [(usize, usize); 5] = [(4, 2), (5, 1), (4, 0), (5, 1), (4, 1)];

pub trait Dashboard {
    /// Print the one-off board inventory.
    fn render_static_table(&mut self, boards: &[BoardDescriptor]) -> io::Result<()>;

    /// Redraw `sample()` until `stop` fires and return why it did.
    fn render_live(
        &mut self,
        sample: &mut dyn FnMut() -> Vec<BoardSample>,
        stop: &StopSignal,
    ) -> io::Result<StopReason>;
}

pub fn static_row(board: &BoardDescriptor) -> [String; 5] {
    [
        board.pci_id(),
        board.kind.series().to_string(),
        board.board_type.clone(),
        board.board_number(),
        board.coordinates(),
    ]
}

/// The one-off board inventory, one row per board.
pub fn static_table(boards: &[BoardDescriptor]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(STATIC_HEADERS.map(|header| {
            comfy_table::Cell::new(header)
                .add_attribute(Attribute::Bold)
                .fg(comfy_table::Color::Cyan)
        }));
    for board in boards {
        table.add_row(static_row(board));
    }
    table
}

fn metrics(sample: &TelemetrySample) -> [Reading; 5] {
    [
        sample.voltage,
        sample.current,
        sample.aiclk,
        sample.power,
        sample.temperature,
    ]
}

/// `value / max` for one metric column.
pub fn format_reading(reading: Reading, column: usize) -> (String, String) {
    let (width, precision) = METRIC_FORMATS[column];
    (
        format!("{:width$.precision$}", reading.value),
        format!(" / {:width$.precision$}", reading.max),
    )
}

pub fn plain_live_line(sample: &BoardSample) -> String {
    let mut line = format!("[{}]", sample.index);
    for (column, (header, reading)) in LIVE_HEADERS[1..]
        .iter()
        .zip(metrics(&sample.sample))
        .enumerate()
    {
        let (value, max) = format_reading(reading, column);
        line.push_str(&format!(" {header}: {}{max}", value.trim_start()));
    }
    line
}

fn live_row(sample: &BoardSample) -> Row<'static> {
    let mut cells = vec![Cell::from(sample.index.to_string())];
    for (column, reading) in metrics(&sample.sample).into_iter().enumerate() {
        let (value, max) = format_reading(reading, column);
        // Voltage is informational only
        let style = match (column, reading.level()) {
            (0, _) => Style::default(),
            (_, Level::Nominal) => Style::default().fg(NOMINAL),
            (_, Level::NearLimit) => Style::default().fg(NEAR_LIMIT),
        };
        cells.push(Cell::from(Line::from(vec![
            Span::styled(value, style),
            Span::styled(max, Style::default().fg(LIMIT_SUFFIX)),
        ])));
    }
    Row::new(cells)
}

pub fn draw_live(frame: &mut Frame, samples: &[BoardSample]) {
    let [table_area, footer_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());

    let header = Row::new(LIVE_HEADERS).style(Style::default().add_modifier(Modifier::BOLD));
    let table = Table::new(
        samples.iter().map(live_row),
        LIVE_WIDTHS.map(Constraint::Length),
    )
    .header(header)
    .block(Block::bordered().title(format!(" Burn-in running on {} boards ", samples.len())));

    frame.render_widget(table, table_area);
    frame.render_widget(
        Paragraph::new(STOP_PROMPT).style(Style::default().add_modifier(Modifier::BOLD)),
        footer_area,
    );
}

/// Dashboard on the process' stdout.
pub struct TerminalDashboard {
    interval: Duration,
    interactive: bool,
}

impl TerminalDashboard {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            interactive: io::stdout().is_tty(),
        }
    }

    fn live_terminal(
        &mut self,
        sample: &mut dyn FnMut() -> Vec<BoardSample>,
        stop: &StopSignal,
    ) -> io::Result<StopReason> {
        let mut samples = sample();
        // Boards only ever leave the table, so the first frame is the tallest.
        let height = samples.len() as u16 + LIVE_CHROME;
        let mut terminal = Terminal::with_options(
            CrosstermBackend::new(io::stdout()),
            TerminalOptions {
                viewport: Viewport::Inline(height),
            },
        )?;

        let reason = loop {
            terminal.draw(|frame| draw_live(frame, &samples))?;
            if let Some(reason) = stop.wait_timeout(self.interval) {
                break reason;
            }
            samples = sample();
        };

        let bottom = terminal.get_frame().area().bottom();
        terminal.set_cursor_position((0, bottom))?;
        println!();
        Ok(reason)
    }

    fn live_plain(
        &mut self,
        sample: &mut dyn FnMut() -> Vec<BoardSample>,
        stop: &StopSignal,
    ) -> io::Result<StopReason> {
        println!("{STOP_PROMPT}");
        let mut stdout = io::stdout();
        loop {
            for line in sample().iter().map(plain_live_line) {
                writeln!(stdout, "{line}")?;
            }
            stdout.flush()?;
            if let Some(reason) = stop.wait_timeout(self.interval) {
                return Ok(reason);
            }
        }
    }
}

impl Dashboard for TerminalDashboard {
    fn render_static_table(&mut self, boards: &[BoardDescriptor]) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout)?;
        writeln!(stdout, "{}", static_table(boards))?;
        writeln!(stdout)?;
        stdout.flush()
    }

    fn render_live(
        &mut self,
        sample: &mut dyn FnMut() -> Vec<BoardSample>,
        stop: &StopSignal,
    ) -> io::Result<StopReason> {
        if self.interactive {
            self.live_terminal(sample, stop)
        } else {
            self.live_plain(sample, stop)
        }
    }
}
