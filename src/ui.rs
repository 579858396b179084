use std::ops::Range;

use chrono::Utc;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Gauge, List, ListItem, Paragraph, Sparkline},
    Frame,
};

use crate::app::App;
use crate::models::{Gpu, NodeSnapshot};
use crate::theme::*;

const HELP: &str = " q quit │ ↑↓ select │ s/x guard node │ S/X guard all │ a auto │ +/- threshold │ [/] window │ r refresh │ c clear log ";

/// Renders the dashboard: header, node panels, trend and event log.
pub fn render(frame: &mut Frame, app: &App) {
    // Main container with dark background
    let main_block = Block::default().style(Style::default().bg(DARK_BG));
    frame.render_widget(main_block, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(5), // Header
            Constraint::Min(0),    // Body
            Constraint::Length(1), // Key help
        ])
        .split(frame.area());

    render_header(frame, chunks[0], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(chunks[1]);

    if app.snapshots.is_empty() {
        render_no_nodes(frame, body[0], app.frame_count);
    } else {
        render_nodes(frame, body[0], app);
    }

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(3)])
        .split(body[1]);
    render_trend(frame, side[0], app);
    render_log(frame, side[1], app);

    let help = Paragraph::new(Span::styled(HELP, Style::default().fg(DIM)))
        .style(Style::default().bg(DARK_BG));
    frame.render_widget(help, chunks[2]);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let now = Utc::now();
    let overview = &app.overview;
    let glitch_char = if app.frame_count % 10 < 2 { "█" } else { " " };
    let separator = || Span::styled(" │ ", Style::default().fg(NEON_GREEN));

    let header_text = vec![
        Line::from(vec![Span::styled(
            "╔══════════════════════════════════════════════════════════════════════════════╗",
            Style::default().fg(NEON_GREEN),
        )]),
        Line::from(vec![
            Span::styled("║  ", Style::default().fg(NEON_GREEN)),
            Span::styled(glitch_char, Style::default().fg(NEON_MAGENTA)),
            Span::styled(
                " GPU GUARD ",
                Style::default().fg(NEON_GREEN).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("v{} ", env!("CARGO_PKG_VERSION")),
                Style::default().fg(CYBER_BLUE),
            ),
            Span::styled("│ ", Style::default().fg(NEON_GREEN)),
            Span::styled(
                format!("{}", now.format("%H:%M:%S")),
                Style::default().fg(NEON_YELLOW),
            ),
            separator(),
            Span::styled(
                format!("NODES: {}/{}", overview.online, overview.nodes),
                Style::default().fg(NEON_CYAN),
            ),
            separator(),
            Span::styled(
                format!("GPUs: {}", overview.gpus),
                Style::default().fg(NEON_MAGENTA),
            ),
            separator(),
            Span::styled(
                format!("GUARDED: {}", overview.guarded),
                Style::default().fg(NEON_GREEN),
            ),
            separator(),
            Span::styled(
                format!("NEED: {}", overview.needing_guard),
                Style::default().fg(if overview.needing_guard > 0 {
                    NEON_RED
                } else {
                    NEON_GREEN
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("║  ", Style::default().fg(NEON_GREEN)),
            Span::styled("POLICY: ", Style::default().fg(DIM)),
            Span::styled(
                format!(
                    "{} min window, {:.0} W threshold",
                    app.policy.interval_minutes(),
                    app.policy.power_threshold_w()
                ),
                Style::default().fg(NEON_YELLOW),
            ),
            separator(),
            Span::styled("AUTO-GUARD: ", Style::default().fg(DIM)),
            if app.auto_guard() {
                Span::styled("ON", Style::default().fg(NEON_GREEN).add_modifier(Modifier::BOLD))
            } else {
                Span::styled("OFF", Style::default().fg(DIM))
            },
            separator(),
            Span::styled(
                match overview.mean_utilization_pct {
                    Some(pct) => format!("MEAN UTIL: {pct:5.1}%"),
                    None => "MEAN UTIL:   --".to_string(),
                },
                Style::default().fg(CYBER_BLUE),
            ),
        ]),
        Line::from(vec![Span::styled(
            "╚══════════════════════════════════════════════════════════════════════════════╝",
            Style::default().fg(NEON_GREEN),
        )]),
    ];

    let header = Paragraph::new(header_text)
        .style(Style::default().bg(DARK_BG))
        .alignment(Alignment::Left);
    frame.render_widget(header, area);
}

fn render_no_nodes(frame: &mut Frame, area: Rect, frame_count: u64) {
    let blink = if frame_count % 20 < 10 { "█" } else { " " };
    let text = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  [", Style::default().fg(NEON_RED)),
            Span::styled(
                "!",
                Style::default()
                    .fg(NEON_YELLOW)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("] ", Style::default().fg(NEON_RED)),
            Span::styled(
                "NO NODES LOADED",
                Style::default().fg(NEON_RED).add_modifier(Modifier::BOLD),
            ),
            Span::styled(blink, Style::default().fg(NEON_GREEN)),
        ]),
        Line::from(""),
        Line::from(vec![Span::styled(
            "      Check the host list or pass --simulate N",
            Style::default().fg(DIM),
        )]),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(NEON_RED))
        .style(Style::default().bg(DARK_BG));

    let paragraph = Paragraph::new(text).block(block);
    frame.render_widget(paragraph, area);
}

/// Borders, the status line, then one row per GPU.
fn panel_height(node: &NodeSnapshot) -> u16 {
    3 + node.gpus.len().max(1) as u16
}

/// The run of panels that fits in `available` rows and contains `selected`.
fn visible_range(heights: &[u16], selected: usize, available: u16) -> Range<usize> {
    if heights.is_empty() {
        return 0..0;
    }
    let selected = selected.min(heights.len() - 1);
    let mut used = heights[selected];
    let mut start = selected;
    while start > 0 && used + heights[start - 1] <= available {
        start -= 1;
        used += heights[start];
    }
    let mut end = selected + 1;
    while end < heights.len() && used + heights[end] <= available {
        used += heights[end];
        end += 1;
    }
    start..end
}

fn render_nodes(frame: &mut Frame, area: Rect, app: &App) {
    let heights: Vec<u16> = app.snapshots.iter().map(panel_height).collect();
    let range = visible_range(&heights, app.selected, area.height);

    let mut constraints: Vec<Constraint> = heights[range.clone()]
        .iter()
        .map(|h| Constraint::Length(*h))
        .collect();
    constraints.push(Constraint::Min(0));
    let panels = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (slot, idx) in range.enumerate() {
        render_node(
            frame,
            &app.snapshots[idx],
            idx == app.selected,
            app.policy.power_threshold_w(),
            panels[slot],
        );
    }
}

fn render_node(
    frame: &mut Frame,
    node: &NodeSnapshot,
    selected: bool,
    threshold: f64,
    area: Rect,
) {
    let (state_label, state_color) = if !node.is_online {
        ("OFFLINE", NEON_RED)
    } else if node.guard_running {
        ("GUARDED", NEON_GREEN)
    } else {
        ("UNGUARDED", NEON_YELLOW)
    };
    let border_color = if selected { NEON_CYAN } else { MATRIX_GREEN };

    let node_block = Block::default()
        .borders(Borders::ALL)
        .border_type(if selected {
            BorderType::Double
        } else {
            BorderType::Rounded
        })
        .border_style(Style::default().fg(border_color))
        .title(vec![
            Span::styled(" ◆ ", Style::default().fg(state_color)),
            Span::styled(
                format!("{} ", node.hostname),
                Style::default().fg(NEON_GREEN).add_modifier(Modifier::BOLD),
            ),
            Span::styled("│ ", Style::default().fg(MATRIX_GREEN)),
            Span::styled(state_label, Style::default().fg(state_color)),
            Span::styled(" ", Style::default()),
        ])
        .style(Style::default().bg(DARK_BG));
    let inner = node_block.inner(area);
    frame.render_widget(node_block, area);

    let mut rows = vec![Constraint::Length(1)];
    rows.extend((0..node.gpus.len().max(1)).map(|_| Constraint::Length(1)));
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(rows)
        .split(inner);

    let updated = node
        .last_updated
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let status = Line::from(vec![
        Span::styled(" NEED GUARD: ", Style::default().fg(DIM)),
        if node.need_guard {
            Span::styled("YES", Style::default().fg(NEON_RED).add_modifier(Modifier::BOLD))
        } else {
            Span::styled("no", Style::default().fg(NEON_GREEN))
        },
        Span::styled(" │ ", Style::default().fg(MATRIX_GREEN)),
        Span::styled("UPDATED: ", Style::default().fg(DIM)),
        Span::styled(updated, Style::default().fg(NEON_YELLOW)),
    ]);
    frame.render_widget(Paragraph::new(status), rows[0]);

    if node.gpus.is_empty() {
        let waiting = Span::styled(" waiting for telemetry...", Style::default().fg(DIM));
        frame.render_widget(Paragraph::new(waiting), rows[1]);
        return;
    }
    for (gpu, row) in node.gpus.iter().zip(rows.iter().skip(1)) {
        render_gpu_row(frame, gpu, threshold, *row);
    }
}

fn render_gpu_row(frame: &mut Frame, gpu: &Gpu, threshold: f64, area: Rect) {
    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(8),  // Index
            Constraint::Min(10),    // Util bar
            Constraint::Min(10),    // Memory bar
            Constraint::Length(18), // Temp and power
        ])
        .split(area);

    let label = Span::styled(
        format!(" GPU{:<3}", gpu.index),
        Style::default().fg(CYBER_BLUE),
    );
    frame.render_widget(Paragraph::new(label), cells[0]);

    frame.render_widget(
        gauge(
            format!("UTIL {:5.1}%", gpu.utilization_pct),
            gpu.utilization_pct,
            util_color(gpu.utilization_pct),
        ),
        cells[1],
    );
    frame.render_widget(
        gauge(
            format!("MEM {:5.1}%", gpu.memory_pct()),
            gpu.memory_pct(),
            NEON_MAGENTA,
        ),
        cells[2],
    );

    let readings = Line::from(vec![
        Span::styled(
            format!(" {:3.0}°C ", gpu.temperature_c),
            Style::default().fg(temp_color(gpu.temperature_c)),
        ),
        Span::styled(
            format!("{:6.1}W", gpu.power_draw_w),
            Style::default()
                .fg(power_color(gpu.power_draw_w, threshold))
                .add_modifier(Modifier::BOLD),
        ),
    ]);
    frame.render_widget(Paragraph::new(readings), cells[3]);
}

fn gauge(label: String, pct: f64, color: Color) -> Gauge<'static> {
    Gauge::default()
        .gauge_style(Style::default().fg(color).bg(GAUGE_BG))
        .percent(pct.clamp(0.0, 100.0) as u16)
        .label(Span::styled(
            label,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_trend(frame: &mut Frame, area: Rect, app: &App) {
    let data: Vec<u64> = app.util_trend.iter().copied().collect();
    let sparkline = Sparkline::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(Color::Rgb(40, 80, 40)))
                .title(Span::styled(" ◇ FLEET UTIL% ", Style::default().fg(NEON_GREEN)))
                .style(Style::default().bg(DARK_BG)),
        )
        .data(&data)
        .style(Style::default().fg(MATRIX_GREEN))
        .max(100);
    frame.render_widget(sparkline, area);
}

fn render_log(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .log
        .iter()
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", entry.at.format("%H:%M:%S")),
                    Style::default().fg(DIM),
                ),
                Span::styled(entry.message.as_str(), Style::default().fg(NEON_CYAN)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(MATRIX_GREEN))
            .title(Span::styled(" ◇ EVENTS ", Style::default().fg(NEON_GREEN)))
            .style(Style::default().bg(DARK_BG)),
    );
    frame.render_widget(list, area);
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn visible_range_keeps_selection_on_screen() {
        let heights = [5, 5, 5, 5];
        assert_eq!(visible_range(&heights, 0, 12), 0..2);
        assert_eq!(visible_range(&heights, 3, 12), 2..4);
        assert_eq!(visible_range(&heights, 1, 100), 0..4);
        assert_eq!(visible_range(&[], 0, 10), 0..0);
    }

    #[test]
    fn oversized_panel_is_still_shown() {
        assert_eq!(visible_range(&[3, 20, 3], 1, 10), 1..2);
    }

    #[test]
    fn panel_reserves_a_row_without_gpus() {
        let node = NodeSnapshot {
            hostname: "h1".into(),
            gpus: Vec::new(),
            guard_running: false,
            last_updated: None,
            need_guard: false,
            is_online: false,
        };
        assert_eq!(panel_height(&node), 4);
    }
}
