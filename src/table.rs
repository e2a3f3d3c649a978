//! Plain-text tables for preview and resolve output.

use std::borrow::Cow;
use std::fmt::Write as _;

const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    max_cell_width: Option<usize>,
}

impl TextTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            max_cell_width: None,
        }
    }

    /// Cells wider than `width` characters are cut and end in `...`.
    pub fn max_cell_width(mut self, width: usize) -> Self {
        self.max_cell_width = Some(width.max(4));
        self
    }

    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let headers = self
            .headers
            .iter()
            .map(|h| self.fit(h))
            .collect::<Vec<_>>();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                (0..headers.len())
                    .map(|idx| row.get(idx).map(|cell| self.fit(cell)).unwrap_or_default())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut widths = headers
            .iter()
            .map(|h| h.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_line(&headers, &widths));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_line(&rule, &widths));
        for row in &rows {
            let _ = writeln!(output, "{}", format_line(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn fit(&self, value: &str) -> String {
        let flat = flatten_cell(value);
        match self.max_cell_width {
            Some(limit) if flat.chars().count() > limit => {
                let mut cut = flat.chars().take(limit - 3).collect::<String>();
                cut.push_str("...");
                cut
            }
            _ => flat.into_owned(),
        }
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if idx > 0 {
            line.push_str(COLUMN_GAP);
        }
        line.push_str(cell);
        let padding = width.saturating_sub(cell.chars().count());
        line.extend(std::iter::repeat_n(' ', padding));
    }
    line.trim_end().to_string()
}

fn flatten_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
