//! Adjacency-matrix files of pairwise difficulties.
//!
//! Format:
//!
//! ```text
//! # optional comment lines
//! 0 1 2
//! 	1.5	3.0
//! 1.5		0.7
//! 3.0	0.7
//! ```
//!
//! The first line lists the frame ordering (whitespace or comma separated).
//! It is followed by exactly one tab-separated row per frame, each with one
//! cell per frame. Empty, unparseable or negative cells mean "no edge"; `inf`
//! marks an excluded edge. The diagonal is ignored. Any structural problem
//! rejects the whole file.

use crate::builder::DifficultyHeuristic;
use crate::graph::{DifficultyGraph, FrameId};
use crate::GraphError;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Dense matrix of difficulties aligned to a frame ordering.
///
/// `cells[i][j]` is the difficulty of registering frame `frames[j]` (moving)
/// onto frame `frames[i]` (fixed).
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyMatrix {
    frames: Vec<FrameId>,
    cells: Vec<Vec<Option<f64>>>,
}

impl DifficultyMatrix {
    /// Evaluate `heuristic` on every ordered pair of distinct frames.
    pub fn from_heuristic(
        frames: &[FrameId],
        heuristic: &dyn DifficultyHeuristic,
    ) -> Result<Self, GraphError> {
        check_unique(frames).map_err(GraphError::InvalidParameter)?;
        let cells = frames
            .iter()
            .map(|&fixed| {
                frames
                    .iter()
                    .map(|&moving| {
                        if fixed == moving {
                            None
                        } else {
                            heuristic
                                .difficulty(fixed, moving)
                                .filter(|w| w.is_finite() && *w >= 0.0)
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            frames: frames.to_vec(),
            cells,
        })
    }

    /// Dense form of `graph`, symmetric, frames in ascending order.
    pub fn from_graph(graph: &DifficultyGraph) -> Self {
        let frames: Vec<FrameId> = graph.frames().collect();
        let cells = frames
            .iter()
            .map(|&a| frames.iter().map(|&b| graph.weight(a, b)).collect())
            .collect();
        Self { frames, cells }
    }

    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }

    /// Difficulty of registering `moving` onto `fixed`, if recorded.
    pub fn get(&self, fixed: FrameId, moving: FrameId) -> Option<f64> {
        let i = self.frames.iter().position(|&f| f == fixed)?;
        let j = self.frames.iter().position(|&f| f == moving)?;
        self.cells[i][j]
    }

    /// Parse the text form. No partial matrix is returned on error.
    pub fn parse(content: &str) -> Result<Self, GraphError> {
        let mut lines = content.lines().enumerate().map(|(i, l)| (i + 1, l));

        let (header_line, header) = lines
            .by_ref()
            .find(|(_, l)| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .ok_or(GraphError::Parse {
                line: 1,
                message: "missing frame header".into(),
            })?;

        let frames = parse_header(header).map_err(|message| GraphError::Parse {
            line: header_line,
            message,
        })?;
        let n = frames.len();

        let mut cells = Vec::with_capacity(n);
        let mut last_line = header_line;
        for (line_no, line) in lines.by_ref().take(n) {
            last_line = line_no;
            let row: Vec<Option<f64>> = line
                .trim_end_matches('\r')
                .split('\t')
                .map(parse_cell)
                .collect();
            if row.len() != n {
                return Err(GraphError::Parse {
                    line: line_no,
                    message: format!("expected {} cells, found {}", n, row.len()),
                });
            }
            cells.push(row);
        }
        if cells.len() != n {
            return Err(GraphError::Parse {
                line: last_line + 1,
                message: format!("expected {} rows, found {}", n, cells.len()),
            });
        }
        if let Some((line_no, _)) = lines.find(|(_, l)| !l.trim().is_empty()) {
            return Err(GraphError::Parse {
                line: line_no,
                message: "unexpected content after matrix".into(),
            });
        }

        for (i, row) in cells.iter_mut().enumerate() {
            row[i] = None;
        }
        debug!("Parsed {}x{} difficulty matrix", n, n);
        Ok(Self { frames, cells })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_string())
            .map_err(|e| GraphError::Io(path.to_path_buf(), e.to_string()))
    }

    /// Collapse to an undirected graph.
    ///
    /// When both directions of a pair are recorded with different values the
    /// smaller one wins.
    pub fn to_graph(&self) -> Result<DifficultyGraph, GraphError> {
        let mut graph = DifficultyGraph::with_frames(self.frames.iter().copied());
        let n = self.frames.len();
        for i in 0..n {
            for j in i + 1..n {
                let weight = match (self.cells[i][j], self.cells[j][i]) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                if let Some(w) = weight {
                    graph.set_edge(self.frames[i], self.frames[j], w)?;
                }
            }
        }
        Ok(graph)
    }
}

impl fmt::Display for DifficultyMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header: Vec<String> = self.frames.iter().map(|t| t.to_string()).collect();
        writeln!(f, "{}", header.join(" "))?;
        for row in &self.cells {
            let cells: Vec<String> = row
                .iter()
                .map(|c| c.map(|w| w.to_string()).unwrap_or_default())
                .collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

fn usable(weight: f64) -> bool {
    !weight.is_nan() && weight >= 0.0
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|w| usable(*w))
}

fn parse_header(line: &str) -> Result<Vec<FrameId>, String> {
    let frames = line
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<FrameId>()
                .map_err(|_| format!("invalid frame id '{}'", t))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if frames.is_empty() {
        return Err("frame header is empty".into());
    }
    check_unique(&frames)?;
    Ok(frames)
}

fn check_unique(frames: &[FrameId]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for &frame in frames {
        if !seen.insert(frame) {
            return Err(format!("duplicate frame {}", frame));
        }
    }
    Ok(())
}
