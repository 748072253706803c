use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::grading::StudentIndex;
use crate::models::{ClassificationResult, Grade, Student};

pub const ANALYSIS_HEADING: &str = "AI Analysis Report";
pub const PASSED_HEADING: &str = "Passed Students";
pub const FAILED_HEADING: &str = "Failed Students";

#[derive(Debug, Clone, Copy)]
pub struct ReportLayout {
    /// Characters per line before narrative text wraps
    pub width: usize,
    pub lines_per_page: usize,
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            width: 80,
            lines_per_page: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Line(String),
    Blank,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub subject_name: String,
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<Section>,
    pub pages: Vec<Page>,
}

impl ReportDocument {
    pub fn section(&self, heading: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.heading == heading)
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "_Generated for {} on {}_",
            self.subject_name,
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        );

        for (index, page) in self.pages.iter().enumerate() {
            if index > 0 {
                let _ = writeln!(output);
                let _ = writeln!(output, "---");
            }
            for block in &page.blocks {
                match block {
                    Block::Heading(text) if text == ANALYSIS_HEADING => {
                        let _ = writeln!(output);
                        let _ = writeln!(output, "# {}", text);
                    }
                    Block::Heading(text) => {
                        let _ = writeln!(output);
                        let _ = writeln!(output, "## {}", text);
                    }
                    Block::Line(text) => {
                        let _ = writeln!(output, "{}", text);
                    }
                    Block::Blank => {
                        let _ = writeln!(output);
                    }
                }
            }
        }

        output
    }
}

pub fn render(
    subject_name: &str,
    result: &ClassificationResult,
    layout: ReportLayout,
    generated_at: DateTime<Utc>,
) -> ReportDocument {
    let sections = vec![
        Section {
            heading: ANALYSIS_HEADING.to_string(),
            lines: wrap_text(&result.analysis, layout.width),
        },
        Section {
            heading: PASSED_HEADING.to_string(),
            lines: result.passed_students.clone(),
        },
        Section {
            heading: FAILED_HEADING.to_string(),
            lines: result.failed_students.clone(),
        },
    ];

    let pages = paginate(&sections, layout.lines_per_page.max(2));

    ReportDocument {
        subject_name: subject_name.to_string(),
        generated_at,
        sections,
        pages,
    }
}

fn paginate(sections: &[Section], lines_per_page: usize) -> Vec<Page> {
    let mut pages = vec![Page::default()];

    for section in sections {
        let current = pages.last().map(|page| page.blocks.len()).unwrap_or(0);
        // keep a heading together with at least one line after it
        if current + 2 > lines_per_page {
            pages.push(Page::default());
        }

        push_block(&mut pages, Block::Heading(section.heading.clone()), lines_per_page);
        for line in &section.lines {
            push_block(&mut pages, Block::Line(line.clone()), lines_per_page);
        }
        push_block(&mut pages, Block::Blank, lines_per_page);
    }

    pages
}

fn push_block(pages: &mut Vec<Page>, block: Block, lines_per_page: usize) {
    let full = pages
        .last()
        .map(|page| page.blocks.len() >= lines_per_page)
        .unwrap_or(true);
    if full {
        if block == Block::Blank {
            return;
        }
        pages.push(Page::default());
    }
    if let Some(page) = pages.last_mut() {
        page.blocks.push(block);
    }
}

/// Greedy word wrap. Paragraph breaks are kept, words longer than the width
/// are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if line.is_empty() {
                word.len()
            } else {
                line.chars().count() + 1 + word.len()
            };
            if needed > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.extend(word);
        }
        lines.push(line);
    }

    lines
}

pub fn format_score(score: Option<f64>) -> String {
    score.map(|value| format!("{:.2}", value)).unwrap_or_default()
}

/// Grade listing for one subject. Rows whose student cannot be resolved show
/// a placeholder name.
pub fn grade_table(grades: &[Grade], students: &[Student]) -> String {
    let index = StudentIndex::new(students);
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{:<36}  {:<24} {:>8} {:>8} {:>9} {:>8}",
        "Grade", "Student", "Prelim", "Midterm", "Semifinal", "Final"
    );
    for grade in grades {
        let _ = writeln!(
            output,
            "{:<36}  {:<24} {:>8} {:>8} {:>9} {:>8}",
            grade.id,
            index.display_name(grade.student_id),
            format_score(grade.prelim),
            format_score(grade.midterm),
            format_score(grade.semifinal),
            format_score(grade.final_score),
        );
    }

    output
}
