//! Daybook domain library: a pure outline/task engine over plain-text journals.
//! Every operation reads a snapshot line array plus explicit indices and returns
//! whole-line edits (or a value); callers own applying the edits atomically and
//! persisting the result. Nothing is cached between calls.

pub mod edit {
    //! Shared edit-set contract. Engines compute edits from one snapshot and
    //! callers apply them as a single atomic batch before calling back in.

    use serde::{Deserialize, Serialize};

    /// Replace the full text of one existing line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Replacement {
        pub line_index: usize,
        pub new_text: String,
    }

    impl Replacement {
        pub fn new(line_index: usize, new_text: impl Into<String>) -> Self {
            Self {
                line_index,
                new_text: new_text.into(),
            }
        }
    }

    /// A whole-line structural edit. `Insert` places its lines so the first one
    /// ends up at `at`; `Delete` removes `start..end` (end exclusive).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "camelCase")]
    pub enum LineEdit {
        Replace { line: usize, text: String },
        Insert { at: usize, lines: Vec<String> },
        Delete { start: usize, end: usize },
    }

    impl LineEdit {
        fn position(&self) -> usize {
            match self {
                LineEdit::Replace { line, .. } => *line,
                LineEdit::Insert { at, .. } => *at,
                LineEdit::Delete { start, .. } => *start,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum EditError {
        #[error("edit position {position} is out of bounds for a {len}-line document")]
        OutOfBounds { position: usize, len: usize },
        #[error("delete range {start}..{end} is empty or inverted")]
        EmptyRange { start: usize, end: usize },
    }

    /// Apply plain replacements. Nothing shifts, so order does not matter; the
    /// whole set is validated before any line changes.
    pub fn apply_replacements(
        lines: &mut [String],
        edits: &[Replacement],
    ) -> Result<(), EditError> {
        for edit in edits {
            if edit.line_index >= lines.len() {
                return Err(EditError::OutOfBounds {
                    position: edit.line_index,
                    len: lines.len(),
                });
            }
        }
        for edit in edits {
            lines[edit.line_index] = edit.new_text.clone();
        }
        Ok(())
    }

    /// Apply a mixed edit set atomically: validate everything against the
    /// snapshot, then apply in descending position order so earlier indices
    /// stay stable. Callers supply non-overlapping edits.
    pub fn apply_edits(lines: &mut Vec<String>, edits: &[LineEdit]) -> Result<(), EditError> {
        let len = lines.len();
        for edit in edits {
            match edit {
                LineEdit::Replace { line, .. } if *line >= len => {
                    return Err(EditError::OutOfBounds {
                        position: *line,
                        len,
                    });
                }
                LineEdit::Insert { at, .. } if *at > len => {
                    return Err(EditError::OutOfBounds { position: *at, len });
                }
                LineEdit::Delete { start, end } => {
                    if *start >= *end {
                        return Err(EditError::EmptyRange {
                            start: *start,
                            end: *end,
                        });
                    }
                    if *end > len {
                        return Err(EditError::OutOfBounds {
                            position: *end,
                            len,
                        });
                    }
                }
                _ => {}
            }
        }

        let mut ordered: Vec<&LineEdit> = edits.iter().collect();
        ordered.sort_by_key(|edit| std::cmp::Reverse(edit.position()));
        for edit in ordered {
            match edit {
                LineEdit::Replace { line, text } => lines[*line] = text.clone(),
                LineEdit::Insert { at, lines: new_lines } => {
                    lines.splice(*at..*at, new_lines.iter().cloned());
                }
                LineEdit::Delete { start, end } => {
                    lines.drain(*start..*end);
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn doc(lines: &[&str]) -> Vec<String> {
            lines.iter().map(|l| l.to_string()).collect()
        }

        #[test]
        fn replacements_apply_in_place() {
            let mut lines = doc(&["a", "b", "c"]);
            apply_replacements(&mut lines, &[Replacement::new(1, "B")]).unwrap();
            assert_eq!(lines, doc(&["a", "B", "c"]));
        }

        #[test]
        fn replacement_out_of_bounds_is_rejected_before_any_edit() {
            let mut lines = doc(&["a", "b"]);
            let edits = vec![Replacement::new(0, "A"), Replacement::new(5, "x")];
            assert!(apply_replacements(&mut lines, &edits).is_err());
            assert_eq!(lines, doc(&["a", "b"]));
        }

        #[test]
        fn mixed_edits_apply_against_snapshot_indices() {
            let mut lines = doc(&["a", "b", "c", "d"]);
            let edits = vec![
                LineEdit::Replace {
                    line: 0,
                    text: "A".to_string(),
                },
                LineEdit::Delete { start: 2, end: 3 },
                LineEdit::Insert {
                    at: 4,
                    lines: vec!["e".to_string()],
                },
            ];
            apply_edits(&mut lines, &edits).unwrap();
            assert_eq!(lines, doc(&["A", "b", "d", "e"]));
        }

        #[test]
        fn insert_at_end_appends() {
            let mut lines = doc(&["a"]);
            apply_edits(
                &mut lines,
                &[LineEdit::Insert {
                    at: 1,
                    lines: vec!["b".to_string(), "c".to_string()],
                }],
            )
            .unwrap();
            assert_eq!(lines, doc(&["a", "b", "c"]));
        }

        #[test]
        fn empty_delete_range_is_an_error() {
            let mut lines = doc(&["a", "b"]);
            let err = apply_edits(&mut lines, &[LineEdit::Delete { start: 1, end: 1 }]);
            assert!(matches!(err, Err(EditError::EmptyRange { .. })));
        }
    }
}

pub mod outline {
    //! Depth and block-extent computation over raw line arrays. Structure is
    //! derived from marker runs and indentation on every call; nothing persists
    //! between invocations, so external edits can never leave stale facts.

    use serde::Serialize;
    use std::ops::Range;

    /// What a single line is, as far as outline structure cares.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(tag = "kind", rename_all = "camelCase")]
    pub enum LineKind {
        /// Marker-run heading; `level` is the run length.
        Heading { level: usize },
        /// Bulleted or numbered list item at some indentation.
        ListItem { indent: usize },
        /// Anything else with visible content.
        Text { indent: usize },
        Blank,
    }

    /// Comparable depth. Headings always sit above body lines, so a heading's
    /// extent runs to the next heading at the same or shallower level while
    /// body text of any indentation stays inside it. Blank lines weigh nothing
    /// and therefore end any list block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Depth {
        Heading(usize),
        Body(usize),
    }

    pub fn classify(line: &str, extra_glyphs: &[char]) -> LineKind {
        if line.trim().is_empty() {
            return LineKind::Blank;
        }
        if let Some(level) = heading_level(line, extra_glyphs) {
            return LineKind::Heading { level };
        }
        let indent = indent_width(line);
        if is_list_item(line) {
            LineKind::ListItem { indent }
        } else {
            LineKind::Text { indent }
        }
    }

    /// Marker-run length when `line` is a heading: an unindented run of `*` or
    /// of one configured glyph, followed by at least one space of title.
    pub fn heading_level(line: &str, extra_glyphs: &[char]) -> Option<usize> {
        let mut chars = line.chars();
        let first = chars.next()?;
        if first != '*' && !extra_glyphs.contains(&first) {
            return None;
        }
        let mut level = 1;
        for c in chars {
            if c == first {
                level += 1;
            } else if c == ' ' || c == '\t' {
                return Some(level);
            } else {
                return None;
            }
        }
        // a bare marker run with nothing after it is not a heading
        None
    }

    /// Title text after a heading's marker run and the following whitespace.
    pub fn heading_title<'a>(line: &'a str, extra_glyphs: &[char]) -> Option<&'a str> {
        heading_level(line, extra_glyphs)?;
        let first = line.chars().next()?;
        let rest = line.trim_start_matches(first);
        Some(rest.trim_start_matches([' ', '\t']))
    }

    /// Leading whitespace width; tabs count one column each.
    pub fn indent_width(line: &str) -> usize {
        line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
    }

    fn is_list_item(line: &str) -> bool {
        let indent = indent_width(line);
        let rest = line.trim_start_matches([' ', '\t']);
        if let Some(tail) = rest.strip_prefix('-').or_else(|| rest.strip_prefix('+')) {
            return tail.starts_with(' ');
        }
        // `*` bullets only count when indented, otherwise the line is a heading
        if indent > 0 {
            if let Some(tail) = rest.strip_prefix('*') {
                return tail.starts_with(' ');
            }
        }
        numbered_bullet(rest)
    }

    fn numbered_bullet(rest: &str) -> bool {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return false;
        }
        let after = &rest[digits..];
        after.starts_with(". ") || after.starts_with(") ")
    }

    pub fn depth_of(line: &str, extra_glyphs: &[char]) -> Depth {
        match classify(line, extra_glyphs) {
            LineKind::Heading { level } => Depth::Heading(level),
            LineKind::ListItem { indent } | LineKind::Text { indent } => Depth::Body(indent),
            LineKind::Blank => Depth::Body(0),
        }
    }

    pub fn is_node(line: &str, extra_glyphs: &[char]) -> bool {
        matches!(
            classify(line, extra_glyphs),
            LineKind::Heading { .. } | LineKind::ListItem { .. }
        )
    }

    /// The root line plus every following line strictly deeper than it.
    pub fn block_extent(lines: &[String], root: usize, extra_glyphs: &[char]) -> Range<usize> {
        if root >= lines.len() {
            return root..root;
        }
        let root_depth = depth_of(&lines[root], extra_glyphs);
        let mut end = root + 1;
        while end < lines.len() && depth_of(&lines[end], extra_glyphs) > root_depth {
            end += 1;
        }
        root..end
    }

    /// The heading a cursor line belongs to: the line itself when it is a
    /// heading, else the closest heading above it.
    pub fn enclosing_heading(
        lines: &[String],
        cursor: usize,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        if cursor >= lines.len() {
            return None;
        }
        (0..=cursor)
            .rev()
            .find(|&i| heading_level(&lines[i], extra_glyphs).is_some())
    }

    /// Resolve any cursor position to the root of the block containing it: the
    /// line itself when it is a heading or list item, otherwise the nearest
    /// strictly shallower node above it. Lines at or above the cursor's own
    /// depth break containment on the way up.
    pub fn nearest_enclosing_node(
        lines: &[String],
        cursor: usize,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        if cursor >= lines.len() {
            return None;
        }
        if is_node(&lines[cursor], extra_glyphs) {
            return Some(cursor);
        }
        let mut bound = depth_of(&lines[cursor], extra_glyphs);
        for idx in (0..cursor).rev() {
            let depth = depth_of(&lines[idx], extra_glyphs);
            if depth < bound {
                if is_node(&lines[idx], extra_glyphs) {
                    return Some(idx);
                }
                bound = depth;
            }
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn doc(lines: &[&str]) -> Vec<String> {
            lines.iter().map(|l| l.to_string()).collect()
        }

        #[test]
        fn classify_recognizes_each_shape() {
            assert_eq!(classify("* Heading", &[]), LineKind::Heading { level: 1 });
            assert_eq!(classify("*** Deep", &[]), LineKind::Heading { level: 3 });
            assert_eq!(classify("☐ Task", &['☐']), LineKind::Heading { level: 1 });
            assert_eq!(classify("  - item", &[]), LineKind::ListItem { indent: 2 });
            assert_eq!(classify("  * starred", &[]), LineKind::ListItem { indent: 2 });
            assert_eq!(classify("1. first", &[]), LineKind::ListItem { indent: 0 });
            assert_eq!(classify("2) second", &[]), LineKind::ListItem { indent: 0 });
            assert_eq!(classify("  prose", &[]), LineKind::Text { indent: 2 });
            assert_eq!(classify("   ", &[]), LineKind::Blank);
        }

        #[test]
        fn marker_runs_need_a_title() {
            assert_eq!(heading_level("*", &[]), None);
            assert_eq!(heading_level("***", &[]), None);
            assert_eq!(heading_level("*text", &[]), None);
            assert_eq!(heading_level("** ok", &[]), Some(2));
        }

        #[test]
        fn heading_title_skips_the_marker_run() {
            assert_eq!(heading_title("** TODO Fix it", &[]), Some("TODO Fix it"));
            assert_eq!(heading_title("☐☐ TODO Fix it", &['☐']), Some("TODO Fix it"));
            assert_eq!(heading_title("plain", &[]), None);
        }

        #[test]
        fn heading_extent_spans_body_and_deeper_headings() {
            let lines = doc(&[
                "* A",
                "body at column zero",
                "",
                "  - item",
                "** A1",
                "more",
                "* B",
            ]);
            assert_eq!(block_extent(&lines, 0, &[]), 0..6);
            assert_eq!(block_extent(&lines, 4, &[]), 4..6);
        }

        #[test]
        fn list_extent_stops_at_equal_indent_and_blanks() {
            let lines = doc(&[
                "  - parent",
                "    - child",
                "      note",
                "  - sibling",
                "",
                "  - after gap",
            ]);
            assert_eq!(block_extent(&lines, 0, &[]), 0..3);
            assert_eq!(block_extent(&lines, 3, &[]), 3..4);
        }

        #[test]
        fn nearest_node_resolves_body_lines_to_their_container() {
            let lines = doc(&[
                "* A",
                "  - item",
                "    nested note",
                "loose text",
            ]);
            assert_eq!(nearest_enclosing_node(&lines, 2, &[]), Some(1));
            // column-zero text is outside the item, but inside the heading
            assert_eq!(nearest_enclosing_node(&lines, 3, &[]), Some(0));
            assert_eq!(nearest_enclosing_node(&lines, 1, &[]), Some(1));
        }

        #[test]
        fn nearest_node_without_any_container_is_none() {
            let lines = doc(&["loose", "  - item"]);
            assert_eq!(nearest_enclosing_node(&lines, 0, &[]), None);
        }
    }
}

pub mod workflow {
    //! Configurable task-state vocabulary: an ordered cycle of keywords with
    //! display glyphs and completion semantics, plus the regex builders other
    //! engines use to recognize task lines.

    use indexmap::IndexMap;
    use regex::Regex;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    /* ------------------------------- States ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum AgendaVisibility {
        #[default]
        Visible,
        Hidden,
    }

    /// One named status in the task cycle.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WorkflowState {
        /// Canonical uppercase keyword, unique within a registry.
        pub keyword: String,
        /// Optional display glyph task lines may use in place of asterisks.
        #[serde(default)]
        pub marker: Option<char>,
        /// Done-like states complete a task.
        #[serde(default)]
        pub is_done_like: bool,
        /// Whether entering this state stamps a `CLOSED:` line.
        #[serde(default)]
        pub stamps_closed: bool,
        #[serde(default, rename = "agendaVisibility")]
        pub agenda: AgendaVisibility,
    }

    /// The fixed fallback cycle, in rotation order.
    pub fn default_workflow_states() -> Vec<WorkflowState> {
        vec![
            WorkflowState {
                keyword: "TODO".to_string(),
                marker: Some('☐'),
                is_done_like: false,
                stamps_closed: false,
                agenda: AgendaVisibility::Visible,
            },
            WorkflowState {
                keyword: "IN_PROGRESS".to_string(),
                marker: Some('◐'),
                is_done_like: false,
                stamps_closed: false,
                agenda: AgendaVisibility::Visible,
            },
            WorkflowState {
                keyword: "CONTINUED".to_string(),
                marker: Some('→'),
                is_done_like: false,
                stamps_closed: false,
                agenda: AgendaVisibility::Visible,
            },
            WorkflowState {
                keyword: "DONE".to_string(),
                marker: Some('☑'),
                is_done_like: true,
                stamps_closed: true,
                agenda: AgendaVisibility::Hidden,
            },
            WorkflowState {
                keyword: "ABANDONED".to_string(),
                marker: Some('✗'),
                is_done_like: true,
                stamps_closed: true,
                agenda: AgendaVisibility::Hidden,
            },
        ]
    }

    /* ----------------------------- Validation ----------------------------- */

    /// Problems found while normalizing a caller-supplied state sequence.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum StateConfigError {
        #[error("workflowStates must be a sequence of state records")]
        NotASequence,
        #[error("workflowStates is empty, using the default cycle")]
        EmptySequence,
        #[error("state record {0} is not an object with a keyword")]
        MalformedState(usize),
        #[error("state keyword must not be empty")]
        EmptyKeyword,
        #[error("duplicate keyword {0:?} dropped")]
        DuplicateKeyword(String),
        #[error("marker for {0:?} may not be an asterisk")]
        AsteriskMarker(String),
    }

    /// Outcome of the config boundary. `value` is always usable: unusable input
    /// falls back to the defaults instead of failing.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ValidationOutcome {
        pub ok: bool,
        pub value: Vec<WorkflowState>,
        pub errors: Vec<StateConfigError>,
    }

    /// Normalize arbitrary JSON into a state sequence. Keywords are trimmed and
    /// uppercased, duplicates and empty keywords are dropped, and an asterisk
    /// marker is nulled so it can never collide with heading syntax.
    pub fn validate_and_normalize_workflow_states(input: &serde_json::Value) -> ValidationOutcome {
        let Some(items) = input.as_array() else {
            return ValidationOutcome {
                ok: false,
                value: default_workflow_states(),
                errors: vec![StateConfigError::NotASequence],
            };
        };
        let mut errors = Vec::new();
        let mut value = Vec::new();
        let mut seen = BTreeSet::new();
        for (idx, item) in items.iter().enumerate() {
            let Ok(mut state) = serde_json::from_value::<WorkflowState>(item.clone()) else {
                errors.push(StateConfigError::MalformedState(idx));
                continue;
            };
            state.keyword = state.keyword.trim().to_ascii_uppercase();
            if state.keyword.is_empty() {
                errors.push(StateConfigError::EmptyKeyword);
                continue;
            }
            if state.marker == Some('*') {
                errors.push(StateConfigError::AsteriskMarker(state.keyword.clone()));
                state.marker = None;
            }
            if !seen.insert(state.keyword.clone()) {
                errors.push(StateConfigError::DuplicateKeyword(state.keyword.clone()));
                continue;
            }
            value.push(state);
        }
        if value.is_empty() {
            errors.push(StateConfigError::EmptySequence);
            return ValidationOutcome {
                ok: false,
                value: default_workflow_states(),
                errors,
            };
        }
        ValidationOutcome {
            ok: errors.is_empty(),
            value,
            errors,
        }
    }

    /* ------------------------------ Registry ------------------------------ */

    /// Rotation direction through the cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CycleDirection {
        Forward,
        Backward,
    }

    /// Ordered keyword → state map; the map order is the cycle order.
    #[derive(Debug, Clone, PartialEq)]
    pub struct WorkflowRegistry {
        states: IndexMap<String, WorkflowState>,
    }

    impl WorkflowRegistry {
        /// Build from a state sequence, re-normalizing so keyword uniqueness
        /// holds no matter where the sequence came from. An empty sequence
        /// falls back to the defaults; a registry is never empty.
        pub fn new(states: Vec<WorkflowState>) -> Self {
            let mut map = IndexMap::new();
            for mut state in states {
                state.keyword = state.keyword.trim().to_ascii_uppercase();
                if state.keyword.is_empty() {
                    continue;
                }
                if state.marker == Some('*') {
                    state.marker = None;
                }
                map.entry(state.keyword.clone()).or_insert(state);
            }
            if map.is_empty() {
                for state in default_workflow_states() {
                    map.insert(state.keyword.clone(), state);
                }
            }
            Self { states: map }
        }

        pub fn default_registry() -> Self {
            Self::new(default_workflow_states())
        }

        pub fn states(&self) -> impl Iterator<Item = &WorkflowState> {
            self.states.values()
        }

        /// Ordered keyword list used for rotation.
        pub fn cycle_keywords(&self) -> Vec<&str> {
            self.states.keys().map(String::as_str).collect()
        }

        pub fn state(&self, keyword: &str) -> Option<&WorkflowState> {
            self.states.get(&keyword.trim().to_ascii_uppercase())
        }

        pub fn is_known_state(&self, keyword: &str) -> bool {
            self.state(keyword).is_some()
        }

        pub fn is_done_like(&self, keyword: &str) -> bool {
            self.state(keyword).map(|s| s.is_done_like).unwrap_or(false)
        }

        pub fn stamps_closed(&self, keyword: &str) -> bool {
            self.state(keyword).map(|s| s.stamps_closed).unwrap_or(false)
        }

        /// First state of the cycle; where keywordless headings enter.
        pub fn initial_state(&self) -> &WorkflowState {
            self.states.values().next().expect("registry is never empty")
        }

        /// One rotation step with wraparound. `current = None` enters the
        /// cycle: forward at the first state, backward at the last.
        pub fn next_state(&self, current: Option<&str>, direction: CycleDirection) -> &WorkflowState {
            let len = self.states.len();
            let idx = current.and_then(|kw| {
                self.states.get_index_of(&kw.trim().to_ascii_uppercase())
            });
            let target = match (idx, direction) {
                (None, CycleDirection::Forward) => 0,
                (None, CycleDirection::Backward) => len - 1,
                (Some(i), CycleDirection::Forward) => (i + 1) % len,
                (Some(i), CycleDirection::Backward) => (i + len - 1) % len,
            };
            self.states
                .get_index(target)
                .map(|(_, state)| state)
                .expect("registry is never empty")
        }

        /// Every configured display glyph, in cycle order.
        pub fn markers(&self) -> Vec<char> {
            self.states.values().filter_map(|s| s.marker).collect()
        }

        /// Heading glyphs for outline computations: the configured state
        /// markers plus any caller-supplied extras, deduplicated.
        pub fn outline_glyphs(&self, extra: &[char]) -> Vec<char> {
            let mut glyphs = self.markers();
            for g in extra {
                if !glyphs.contains(g) {
                    glyphs.push(*g);
                }
            }
            glyphs
        }

        /// Rewrite a heading line into a target state: the keyword is replaced
        /// (or inserted before the title when none is present), and a run of
        /// state-marker glyphs is redrawn with the target's marker. Asterisk
        /// and non-marker glyph runs keep their spelling.
        pub fn rewrite_heading_for_state(
            &self,
            line: &str,
            target: &WorkflowState,
            extra_glyphs: &[char],
        ) -> Option<String> {
            let glyphs = self.outline_glyphs(extra_glyphs);
            let level = crate::outline::heading_level(line, &glyphs)?;
            let title = crate::outline::heading_title(line, &glyphs)?;
            let prefix_len = line.len() - title.len();
            let first = line.chars().next()?;
            let prefix = match target.marker {
                Some(marker) if self.markers().contains(&first) => {
                    let run_len = first.len_utf8() * level;
                    let ws = &line[run_len..prefix_len];
                    let mut run = String::new();
                    for _ in 0..level {
                        run.push(marker);
                    }
                    format!("{run}{ws}")
                }
                _ => line[..prefix_len].to_string(),
            };
            let rest = match title.split_whitespace().next() {
                Some(word) if self.is_known_state(word) => title[word.len()..].trim_start(),
                _ => title,
            };
            let rebuilt = format!("{prefix}{} {rest}", target.keyword);
            Some(rebuilt.trim_end().to_string())
        }

        /// The registry keyword on a heading line, when the first word after
        /// the marker run is a known state. The returned slice borrows the
        /// line, preserving its spelling.
        pub fn heading_keyword<'a>(&self, line: &'a str) -> Option<&'a str> {
            let markers = self.markers();
            let title = crate::outline::heading_title(line, &markers)?;
            let word = title.split_whitespace().next()?;
            if self.is_known_state(word) {
                Some(word)
            } else {
                None
            }
        }

        /// Regex matching a task heading: a marker-glyph run (or, when
        /// `allow_asterisks`, an asterisk run), whitespace, then one of the
        /// cycle keywords captured as group 1.
        pub fn build_task_heading_regex(&self, allow_asterisks: bool) -> Regex {
            build_heading_regex(self.states.values(), allow_asterisks)
        }
    }

    /// Task-line prefix match under either heading style, independent of any
    /// registry instance; used for generic task scanning.
    pub fn build_task_prefix_regex(states: &[WorkflowState]) -> Regex {
        if states.is_empty() {
            return build_heading_regex(default_workflow_states().iter(), true);
        }
        build_heading_regex(states.iter(), true)
    }

    fn build_heading_regex<'a>(
        states: impl Iterator<Item = &'a WorkflowState>,
        allow_asterisks: bool,
    ) -> Regex {
        let mut glyphs = String::new();
        let mut keywords = Vec::new();
        for state in states {
            if let Some(marker) = state.marker {
                glyphs.push_str(&regex::escape(&marker.to_string()));
            }
            keywords.push(regex::escape(&state.keyword));
        }
        let mut marker_alt = Vec::new();
        if !glyphs.is_empty() {
            marker_alt.push(format!("[{glyphs}]+"));
        }
        if allow_asterisks || glyphs.is_empty() {
            marker_alt.push(r"\*+".to_string());
        }
        let pattern = format!(
            r"^(?:{})[ \t]+({})\b",
            marker_alt.join("|"),
            keywords.join("|")
        );
        Regex::new(&pattern).expect("composed task heading regex is valid")
    }

}

pub mod checkbox {
    //! Checkbox aggregation and toggling. Stats are recomputed from the line
    //! array on every call; cookies (`[n/m]`, `[p%]`) are rewritten only by an
    //! explicit pass so toggle edits stay minimal and predictable.

    use crate::edit::Replacement;
    use crate::outline::{block_extent, classify, heading_level, LineKind};
    use indexmap::IndexMap;
    use regex::Regex;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::ops::Range;
    use std::sync::LazyLock;

    /* ------------------------------- Items ------------------------------- */

    /// `[ ]`, `[-]`, `[X]`. Partial is only ever produced by aggregation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CheckboxState {
        Empty,
        Partial,
        Checked,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CheckboxStats {
        pub checked: usize,
        pub total: usize,
    }

    static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^([ \t]*)(?:[-+*]|\d+[.)])[ \t]+\[([ xX-])\](?:[ \t]|$)")
            .expect("invalid checkbox item regex")
    });

    /// Indent, marker byte range, and state of a checkbox item line. Unindented
    /// `*` lines are headings, never checkbox items.
    fn checkbox_capture(line: &str) -> Option<(usize, Range<usize>, CheckboxState)> {
        if heading_level(line, &[]).is_some() {
            return None;
        }
        let caps = CHECKBOX_RE.captures(line)?;
        let indent = caps.get(1)?.as_str().chars().count();
        let marker = caps.get(2)?;
        let state = match marker.as_str() {
            "x" | "X" => CheckboxState::Checked,
            "-" => CheckboxState::Partial,
            _ => CheckboxState::Empty,
        };
        Some((indent, marker.range(), state))
    }

    /// State of the checkbox on a line, when the line is a checkbox item.
    pub fn checkbox_state(line: &str) -> Option<CheckboxState> {
        checkbox_capture(line).map(|(_, _, state)| state)
    }

    pub fn is_checkbox_line(line: &str) -> bool {
        checkbox_capture(line).is_some()
    }

    fn set_checkbox_state(line: &str, state: CheckboxState) -> Option<String> {
        let (_, marker, _) = checkbox_capture(line)?;
        let glyph = match state {
            CheckboxState::Checked => "X",
            CheckboxState::Partial => "-",
            CheckboxState::Empty => " ",
        };
        let mut out = String::with_capacity(line.len());
        out.push_str(&line[..marker.start]);
        out.push_str(glyph);
        out.push_str(&line[marker.end..]);
        Some(out)
    }

    /* ------------------------------ Cookies ------------------------------ */

    /// Cookie presentation mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CookieMode {
        #[default]
        Fraction,
        Percent,
    }

    /// A located cookie token: byte span, raw text, and mode.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CookieSpan {
        pub start: usize,
        pub end: usize,
        pub raw: String,
        pub mode: CookieMode,
    }

    static COOKIE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[(?:\d+/\d+|\d+%)\]").expect("invalid cookie regex"));

    static TAG_CLUSTER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[ \t]+((?::[A-Za-z0-9_@#%]+)+:)[ \t]*$").expect("invalid tag cluster regex")
    });

    /// The trailing `:TAG:TAG:` cluster of a line: byte offset where its
    /// leading whitespace starts, plus the cluster text itself.
    pub fn trailing_tag_cluster(line: &str) -> Option<(usize, &str)> {
        let caps = TAG_CLUSTER_RE.captures(line)?;
        let whole = caps.get(0)?;
        let cluster = caps.get(1)?;
        Some((whole.start(), cluster.as_str()))
    }

    /// The last cookie-shaped token on a line, if any.
    pub fn find_checkbox_cookie(line: &str) -> Option<CookieSpan> {
        let m = COOKIE_RE.find_iter(line).last()?;
        let raw = m.as_str().to_string();
        let mode = if raw.contains('/') {
            CookieMode::Fraction
        } else {
            CookieMode::Percent
        };
        Some(CookieSpan {
            start: m.start(),
            end: m.end(),
            raw,
            mode,
        })
    }

    pub fn has_checkbox_cookie(line: &str) -> bool {
        find_checkbox_cookie(line).is_some()
    }

    /// Render stats under a mode. Percent truncates, and an empty population
    /// renders as `[0/0]` or `[0%]` rather than dividing by zero.
    pub fn format_checkbox_stats(stats: CheckboxStats, mode: CookieMode) -> String {
        match mode {
            CookieMode::Fraction => format!("[{}/{}]", stats.checked, stats.total),
            CookieMode::Percent => {
                let pct = if stats.total == 0 {
                    0
                } else {
                    stats.checked * 100 / stats.total
                };
                format!("[{pct}%]")
            }
        }
    }

    fn place_cookie(line: &str, token: &str) -> String {
        if let Some(cookie) = find_checkbox_cookie(line) {
            let mut out = String::with_capacity(line.len());
            out.push_str(&line[..cookie.start]);
            out.push_str(token);
            out.push_str(&line[cookie.end..]);
            return out;
        }
        if let Some((ws_start, cluster)) = trailing_tag_cluster(line) {
            return format!("{} {} {}", &line[..ws_start], token, cluster);
        }
        format!("{} {}", line.trim_end(), token)
    }

    /// Insert a placeholder cookie, placed just before a trailing tag cluster
    /// when one exists, otherwise at the end of the line. An existing cookie is
    /// replaced in place. Real counts come from a recomputation pass.
    pub fn upsert_checkbox_cookie(line: &str, mode: CookieMode) -> String {
        place_cookie(line, &format_checkbox_stats(CheckboxStats::default(), mode))
    }

    /// Replace or insert a cookie carrying the given stats.
    pub fn write_checkbox_cookie(line: &str, stats: CheckboxStats, mode: CookieMode) -> String {
        place_cookie(line, &format_checkbox_stats(stats, mode))
    }

    /// Remove the cookie, collapsing the space it sat in so trailing tags keep
    /// a single separator.
    pub fn remove_checkbox_cookie(line: &str) -> String {
        let Some(cookie) = find_checkbox_cookie(line) else {
            return line.to_string();
        };
        let before = line[..cookie.start].trim_end();
        let after = line[cookie.end..].trim_start();
        if after.is_empty() {
            before.to_string()
        } else {
            format!("{before} {after}")
        }
    }

    /* ---------------------------- Aggregation ---------------------------- */

    /// Direct-children stats for a line range. `parent_indent = None` counts
    /// items at the shallowest checkbox indentation in the range (a heading's
    /// own list); `Some(w)` counts items exactly one indentation step below
    /// `w`. Items nested deeper than the chosen step never count.
    pub fn hierarchical_stats_in_range(
        lines: &[String],
        start: usize,
        end: usize,
        parent_indent: Option<usize>,
    ) -> CheckboxStats {
        let end = end.min(lines.len());
        if start >= end {
            return CheckboxStats::default();
        }
        let mut step: Option<usize> = None;
        for line in &lines[start..end] {
            if let Some((indent, _, _)) = checkbox_capture(line) {
                let eligible = match parent_indent {
                    None => true,
                    Some(parent) => indent > parent,
                };
                if eligible {
                    step = Some(step.map_or(indent, |s| s.min(indent)));
                }
            }
        }
        let Some(step) = step else {
            return CheckboxStats::default();
        };
        let mut stats = CheckboxStats::default();
        for line in &lines[start..end] {
            if let Some((indent, _, state)) = checkbox_capture(line) {
                if indent == step {
                    stats.total += 1;
                    if state == CheckboxState::Checked {
                        stats.checked += 1;
                    }
                }
            }
        }
        stats
    }

    /// Stats for every heading's own checkbox list: direct children found in
    /// the heading's extent, stopping at the first nested sub-heading (those
    /// items belong to the sub-heading). Headings without items map to 0/0.
    pub fn stats_by_heading(
        lines: &[String],
        extra_glyphs: &[char],
    ) -> IndexMap<usize, CheckboxStats> {
        let mut out = IndexMap::new();
        for idx in 0..lines.len() {
            if heading_level(&lines[idx], extra_glyphs).is_none() {
                continue;
            }
            let extent = block_extent(lines, idx, extra_glyphs);
            let mut end = extent.end;
            for inner in idx + 1..extent.end {
                if heading_level(&lines[inner], extra_glyphs).is_some() {
                    end = inner;
                    break;
                }
            }
            out.insert(idx, hierarchical_stats_in_range(lines, idx + 1, end, None));
        }
        out
    }

    /* ------------------------------- Toggle ------------------------------- */

    /// Edits for toggling one checkbox. The target flips between `[ ]` and
    /// `[X]` (a `[-]` target counts as unchecked), every descendant checkbox
    /// follows the new state, and each strict ancestor is recomputed from its
    /// direct children: all checked → `[X]`, none → `[ ]`, mixed → `[-]`.
    /// Cookies are left alone; run the refresh pass afterwards.
    pub fn compute_toggle_edits(
        lines: &[String],
        idx: usize,
        extra_glyphs: &[char],
    ) -> Vec<Replacement> {
        if idx >= lines.len() {
            return Vec::new();
        }
        let Some((_, _, state)) = checkbox_capture(&lines[idx]) else {
            return Vec::new();
        };
        let new_state = match state {
            CheckboxState::Checked => CheckboxState::Empty,
            CheckboxState::Empty | CheckboxState::Partial => CheckboxState::Checked,
        };

        let mut overlay: BTreeMap<usize, CheckboxState> = BTreeMap::new();
        overlay.insert(idx, new_state);
        let extent = block_extent(lines, idx, extra_glyphs);
        for line_idx in extent.start + 1..extent.end {
            if checkbox_capture(&lines[line_idx]).is_some() {
                overlay.insert(line_idx, new_state);
            }
        }
        for ancestor in ancestor_checkbox_items(lines, idx, extra_glyphs) {
            if let Some(recomputed) = recompute_from_children(lines, ancestor, &overlay, extra_glyphs) {
                overlay.insert(ancestor, recomputed);
            }
        }

        overlay
            .into_iter()
            .filter_map(|(line_idx, state)| {
                let new_text = set_checkbox_state(&lines[line_idx], state)?;
                (new_text != lines[line_idx]).then(|| Replacement::new(line_idx, new_text))
            })
            .collect()
    }

    /// One shared state for an explicit selection: checked when any selected
    /// checkbox is not yet checked, otherwise unchecked. Exactly the selected
    /// lines change; nothing propagates.
    pub fn compute_bulk_toggle_edits(lines: &[String], idxs: &[usize]) -> Vec<Replacement> {
        let mut targets: BTreeMap<usize, CheckboxState> = BTreeMap::new();
        for &idx in idxs {
            if idx >= lines.len() {
                continue;
            }
            if let Some((_, _, state)) = checkbox_capture(&lines[idx]) {
                targets.insert(idx, state);
            }
        }
        let any_unchecked = targets.values().any(|s| *s != CheckboxState::Checked);
        let new_state = if any_unchecked {
            CheckboxState::Checked
        } else {
            CheckboxState::Empty
        };
        targets
            .into_iter()
            .filter_map(|(line_idx, _)| {
                let new_text = set_checkbox_state(&lines[line_idx], new_state)?;
                (new_text != lines[line_idx]).then(|| Replacement::new(line_idx, new_text))
            })
            .collect()
    }

    /// Checkbox items strictly containing `idx`, nearest first. The walk stops
    /// at headings and blank lines since both end a list block, and any line
    /// shallower than the running bound tightens it whether or not it carries
    /// a checkbox.
    fn ancestor_checkbox_items(lines: &[String], idx: usize, extra_glyphs: &[char]) -> Vec<usize> {
        let Some((start_indent, _, _)) = checkbox_capture(&lines[idx]) else {
            return Vec::new();
        };
        let mut bound = start_indent;
        let mut out = Vec::new();
        for line_idx in (0..idx).rev() {
            match classify(&lines[line_idx], extra_glyphs) {
                LineKind::Heading { .. } | LineKind::Blank => break,
                LineKind::ListItem { indent } | LineKind::Text { indent } => {
                    if indent < bound {
                        if checkbox_capture(&lines[line_idx]).is_some() {
                            out.push(line_idx);
                        }
                        bound = indent;
                    }
                }
            }
        }
        out
    }

    /// Aggregate an item's direct children through the overlay of pending
    /// states. Children carrying `[-]` force the parent to `[-]` as well.
    fn recompute_from_children(
        lines: &[String],
        item: usize,
        overlay: &BTreeMap<usize, CheckboxState>,
        extra_glyphs: &[char],
    ) -> Option<CheckboxState> {
        let (indent, _, _) = checkbox_capture(&lines[item])?;
        let extent = block_extent(lines, item, extra_glyphs);
        let mut step: Option<usize> = None;
        for line_idx in extent.start + 1..extent.end {
            if let Some((child_indent, _, _)) = checkbox_capture(&lines[line_idx]) {
                if child_indent > indent {
                    step = Some(step.map_or(child_indent, |s| s.min(child_indent)));
                }
            }
        }
        let step = step?;
        let mut all_checked = true;
        let mut all_empty = true;
        for line_idx in extent.start + 1..extent.end {
            let Some((child_indent, _, state)) = checkbox_capture(&lines[line_idx]) else {
                continue;
            };
            if child_indent != step {
                continue;
            }
            let effective = overlay.get(&line_idx).copied().unwrap_or(state);
            match effective {
                CheckboxState::Checked => all_empty = false,
                CheckboxState::Empty => all_checked = false,
                CheckboxState::Partial => {
                    all_checked = false;
                    all_empty = false;
                }
            }
        }
        Some(if all_checked {
            CheckboxState::Checked
        } else if all_empty {
            CheckboxState::Empty
        } else {
            CheckboxState::Partial
        })
    }

    /* ------------------------------- Refresh ------------------------------ */

    /// Rewrite every line that already carries a cookie from freshly computed
    /// stats, keeping each cookie's own mode. This is the explicit pass callers
    /// run after applying toggle edits.
    pub fn compute_cookie_refresh_edits(
        lines: &[String],
        extra_glyphs: &[char],
    ) -> Vec<Replacement> {
        let heading_stats = stats_by_heading(lines, extra_glyphs);
        let mut out = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Some(cookie) = find_checkbox_cookie(line) else {
                continue;
            };
            let stats = if let Some(stats) = heading_stats.get(&idx) {
                *stats
            } else if let Some((indent, _, _)) = checkbox_capture(line) {
                let extent = block_extent(lines, idx, extra_glyphs);
                hierarchical_stats_in_range(lines, extent.start + 1, extent.end, Some(indent))
            } else {
                continue;
            };
            let token = format_checkbox_stats(stats, cookie.mode);
            if token != cookie.raw {
                out.push(Replacement::new(idx, place_cookie(line, &token)));
            }
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::edit::apply_replacements;

        fn doc(lines: &[&str]) -> Vec<String> {
            lines.iter().map(|l| l.to_string()).collect()
        }

        #[test]
        fn checkbox_detection_covers_bullet_styles() {
            assert_eq!(checkbox_state("- [ ] plain"), Some(CheckboxState::Empty));
            assert_eq!(checkbox_state("  + [X] plus"), Some(CheckboxState::Checked));
            assert_eq!(checkbox_state("  * [x] star"), Some(CheckboxState::Checked));
            assert_eq!(checkbox_state("1. [-] numbered"), Some(CheckboxState::Partial));
            assert_eq!(checkbox_state("2) [ ] paren"), Some(CheckboxState::Empty));
            assert_eq!(checkbox_state("- [ ]"), Some(CheckboxState::Empty));
            assert_eq!(checkbox_state("- [y] unknown marker"), None);
            assert_eq!(checkbox_state("- no box"), None);
            // an unindented asterisk line is a heading, not an item
            assert_eq!(checkbox_state("* [ ] heading title"), None);
        }

        #[test]
        fn stats_by_heading_counts_direct_children_only() {
            let lines = doc(&[
                "* Groceries",
                "  - [X] milk",
                "  - [ ] eggs",
                "    - [X] nested does not count",
                "* Empty",
                "** Sub",
                "  - [X] belongs to sub",
            ]);
            let stats = stats_by_heading(&lines, &[]);
            assert_eq!(stats[&0], CheckboxStats { checked: 1, total: 2 });
            assert_eq!(stats[&4], CheckboxStats { checked: 0, total: 0 });
            assert_eq!(stats[&5], CheckboxStats { checked: 1, total: 1 });
        }

        #[test]
        fn hierarchical_stats_pick_one_indent_step() {
            let lines = doc(&[
                "  - [ ] parent",
                "    - [X] a",
                "    - [ ] b",
                "      - [X] grandchild",
            ]);
            let direct = hierarchical_stats_in_range(&lines, 1, lines.len(), Some(2));
            assert_eq!(direct, CheckboxStats { checked: 1, total: 2 });
            let shallowest = hierarchical_stats_in_range(&lines, 0, lines.len(), None);
            assert_eq!(shallowest, CheckboxStats { checked: 0, total: 1 });
        }

        #[test]
        fn percent_formatting_truncates() {
            let stats = CheckboxStats { checked: 2, total: 3 };
            assert_eq!(format_checkbox_stats(stats, CookieMode::Percent), "[66%]");
            assert_eq!(format_checkbox_stats(stats, CookieMode::Fraction), "[2/3]");
            let empty = CheckboxStats::default();
            assert_eq!(format_checkbox_stats(empty, CookieMode::Percent), "[0%]");
            assert_eq!(format_checkbox_stats(empty, CookieMode::Fraction), "[0/0]");
        }

        #[test]
        fn cookie_lands_before_trailing_tags() {
            assert_eq!(
                upsert_checkbox_cookie("* Heading :WORK:HOME:", CookieMode::Fraction),
                "* Heading [0/0] :WORK:HOME:"
            );
            assert_eq!(
                upsert_checkbox_cookie("* Heading", CookieMode::Percent),
                "* Heading [0%]"
            );
            // an existing cookie is replaced in place
            assert_eq!(
                write_checkbox_cookie(
                    "* Heading [1/4] :TAG:",
                    CheckboxStats { checked: 3, total: 4 },
                    CookieMode::Fraction
                ),
                "* Heading [3/4] :TAG:"
            );
        }

        #[test]
        fn cookie_removal_keeps_tags_and_spacing() {
            assert_eq!(
                remove_checkbox_cookie("* Heading [2/3] :TAG:"),
                "* Heading :TAG:"
            );
            assert_eq!(remove_checkbox_cookie("* Heading [66%]"), "* Heading");
            assert_eq!(remove_checkbox_cookie("* Untouched"), "* Untouched");
        }

        #[test]
        fn find_cookie_takes_the_last_token() {
            let span = find_checkbox_cookie("* Review [10/12] expenses [50%]").unwrap();
            assert_eq!(span.raw, "[50%]");
            assert_eq!(span.mode, CookieMode::Percent);
        }

        #[test]
        fn toggling_a_leaf_marks_ancestors_partial() {
            let lines = doc(&[
                "* Tasks",
                "  - [ ] grandparent",
                "    - [ ] parent",
                "      - [ ] leaf one",
                "      - [ ] leaf two",
            ]);
            let edits = compute_toggle_edits(&lines, 3, &[]);
            let map: BTreeMap<usize, &str> = edits
                .iter()
                .map(|e| (e.line_index, e.new_text.as_str()))
                .collect();
            assert_eq!(map[&3], "      - [X] leaf one");
            assert_eq!(map[&2], "    - [-] parent");
            assert_eq!(map[&1], "  - [-] grandparent");
            assert_eq!(edits.len(), 3);
        }

        #[test]
        fn checking_the_last_sibling_completes_the_chain() {
            let mut lines = doc(&[
                "  - [-] parent",
                "    - [X] done already",
                "    - [ ] last open",
            ]);
            let edits = compute_toggle_edits(&lines, 2, &[]);
            apply_replacements(&mut lines, &edits).unwrap();
            assert_eq!(
                lines,
                doc(&[
                    "  - [X] parent",
                    "    - [X] done already",
                    "    - [X] last open",
                ])
            );
        }

        #[test]
        fn toggling_a_parent_cascades_to_every_descendant() {
            let mut lines = doc(&[
                "* List",
                "  - [ ] parent",
                "    - [X] a",
                "    - [-] b",
                "      - [ ] deep",
                "  - [ ] unrelated sibling",
            ]);
            let edits = compute_toggle_edits(&lines, 1, &[]);
            apply_replacements(&mut lines, &edits).unwrap();
            assert_eq!(
                lines,
                doc(&[
                    "* List",
                    "  - [X] parent",
                    "    - [X] a",
                    "    - [X] b",
                    "      - [X] deep",
                    "  - [ ] unrelated sibling",
                ])
            );
        }

        #[test]
        fn unchecking_a_parent_clears_the_subtree() {
            let mut lines = doc(&[
                "  - [X] parent",
                "    - [X] a",
                "    - [X] b",
            ]);
            let edits = compute_toggle_edits(&lines, 0, &[]);
            apply_replacements(&mut lines, &edits).unwrap();
            assert_eq!(
                lines,
                doc(&["  - [ ] parent", "    - [ ] a", "    - [ ] b"])
            );
        }

        #[test]
        fn a_partial_target_becomes_checked() {
            let lines = doc(&["- [-] partial parent", "  - [X] a", "  - [ ] b"]);
            let edits = compute_toggle_edits(&lines, 0, &[]);
            let root = edits.iter().find(|e| e.line_index == 0).unwrap();
            assert_eq!(root.new_text, "- [X] partial parent");
        }

        #[test]
        fn bulk_toggle_checks_when_any_is_open() {
            let lines = doc(&[
                "- [X] one",
                "- [ ] two",
                "- [-] three",
                "not a checkbox",
            ]);
            let edits = compute_bulk_toggle_edits(&lines, &[0, 1, 2, 3]);
            let map: BTreeMap<usize, &str> = edits
                .iter()
                .map(|e| (e.line_index, e.new_text.as_str()))
                .collect();
            // line 0 already checked, lines 1 and 2 flip, line 3 ignored
            assert_eq!(edits.len(), 2);
            assert_eq!(map[&1], "- [X] two");
            assert_eq!(map[&2], "- [X] three");
        }

        #[test]
        fn bulk_toggle_unchecks_when_all_are_checked() {
            let lines = doc(&["- [X] one", "- [X] two"]);
            let edits = compute_bulk_toggle_edits(&lines, &[0, 1]);
            assert_eq!(edits.len(), 2);
            assert!(edits.iter().all(|e| e.new_text.contains("[ ]")));
        }

        #[test]
        fn refresh_rewrites_stale_cookies_in_both_modes() {
            let lines = doc(&[
                "* Chores [0/0]",
                "  - [X] sweep",
                "  - [ ] mop",
                "  - [ ] dust",
                "* Done list [10%]",
                "  - [X] everything",
            ]);
            let edits = compute_cookie_refresh_edits(&lines, &[]);
            let map: BTreeMap<usize, &str> = edits
                .iter()
                .map(|e| (e.line_index, e.new_text.as_str()))
                .collect();
            assert_eq!(map[&0], "* Chores [1/3]");
            assert_eq!(map[&4], "* Done list [100%]");
        }

        #[test]
        fn refresh_covers_item_cookies_at_their_own_scope() {
            let lines = doc(&[
                "  - [-] parent [9/9]",
                "    - [X] a",
                "    - [ ] b",
            ]);
            let edits = compute_cookie_refresh_edits(&lines, &[]);
            assert_eq!(edits.len(), 1);
            assert_eq!(edits[0].new_text, "  - [-] parent [1/2]");
        }

        #[test]
        fn refresh_leaves_accurate_cookies_untouched() {
            let lines = doc(&["* OK [1/2]", "  - [X] a", "  - [ ] b"]);
            assert!(compute_cookie_refresh_edits(&lines, &[]).is_empty());
        }
    }
}

pub mod reorder {
    //! Whole-subtree reordering: swap a node's block with its adjacent sibling
    //! block of the same kind and depth, as one wholesale rearrangement.

    use crate::outline::{block_extent, classify, depth_of, nearest_enclosing_node, LineKind};
    use std::ops::Range;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MoveDirection {
        Up,
        Down,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum NodeClass {
        Heading,
        Item,
    }

    fn node_class(line: &str, extra_glyphs: &[char]) -> Option<NodeClass> {
        match classify(line, extra_glyphs) {
            LineKind::Heading { .. } => Some(NodeClass::Heading),
            LineKind::ListItem { .. } => Some(NodeClass::Item),
            _ => None,
        }
    }

    /// Swap the cursor's block with its adjacent sibling block. Any cursor
    /// line inside the block yields the same result. Returns the full updated
    /// line array, or `None` when the cursor resolves to no node or the block
    /// has no same-depth sibling in that direction.
    pub fn compute_move_block(
        lines: &[String],
        cursor: usize,
        direction: MoveDirection,
        extra_glyphs: &[char],
    ) -> Option<Vec<String>> {
        let root = nearest_enclosing_node(lines, cursor, extra_glyphs)?;
        let root_extent = block_extent(lines, root, extra_glyphs);
        let sibling = find_sibling(lines, root, &root_extent, direction, extra_glyphs)?;
        let sibling_extent = block_extent(lines, sibling, extra_glyphs);

        let (first, second) = if sibling < root {
            (sibling_extent, root_extent)
        } else {
            (root_extent, sibling_extent)
        };
        let mut out = Vec::with_capacity(lines.len());
        out.extend_from_slice(&lines[..first.start]);
        out.extend_from_slice(&lines[second.clone()]);
        out.extend_from_slice(&lines[first.end..second.start]);
        out.extend_from_slice(&lines[first.clone()]);
        out.extend_from_slice(&lines[second.end..]);
        Some(out)
    }

    fn find_sibling(
        lines: &[String],
        root: usize,
        root_extent: &Range<usize>,
        direction: MoveDirection,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        let root_depth = depth_of(&lines[root], extra_glyphs);
        let root_class = node_class(&lines[root], extra_glyphs)?;
        match direction {
            MoveDirection::Down => {
                let candidate = root_extent.end;
                if candidate >= lines.len() {
                    return None;
                }
                let matches = depth_of(&lines[candidate], extra_glyphs) == root_depth
                    && node_class(&lines[candidate], extra_glyphs) == Some(root_class);
                matches.then_some(candidate)
            }
            MoveDirection::Up => {
                for idx in (0..root).rev() {
                    let depth = depth_of(&lines[idx], extra_glyphs);
                    if depth > root_depth {
                        continue;
                    }
                    if depth == root_depth
                        && node_class(&lines[idx], extra_glyphs) == Some(root_class)
                    {
                        return Some(idx);
                    }
                    return None;
                }
                None
            }
        }
    }

}

pub mod dates {
    //! Strict multi-format date handling: timestamp parsing with weekday
    //! verification, repeater advancement, and planning-line rescheduling.
    //!
    //! Parsing is strict on purpose. A timestamp either matches one accepted
    //! layout exactly, with any spelled-out weekday agreeing with the calendar,
    //! or it is treated as absent; malformed text is never an error.

    use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime, Timelike};
    use nom::{
        branch::alt,
        bytes::complete::{tag, take_while, take_while1},
        character::complete::{char as nom_char, space1},
        combinator::{map, map_res, opt},
        error::{VerboseError, VerboseErrorKind},
        sequence::{preceded, tuple},
        IResult,
    };
    use regex::Regex;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::sync::LazyLock;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------------- Formats ------------------------------ */

    /// Accepted date layouts, named by their configuration tokens.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DateFormat {
        #[serde(rename = "YYYY-MM-DD")]
        YearMonthDay,
        #[serde(rename = "MM-DD-YYYY")]
        MonthDayYear,
        #[serde(rename = "DD-MM-YYYY")]
        DayMonthYear,
    }

    impl DateFormat {
        pub fn token(self) -> &'static str {
            match self {
                DateFormat::YearMonthDay => "YYYY-MM-DD",
                DateFormat::MonthDayYear => "MM-DD-YYYY",
                DateFormat::DayMonthYear => "DD-MM-YYYY",
            }
        }

        pub fn from_token(token: &str) -> Option<Self> {
            match token.trim() {
                "YYYY-MM-DD" => Some(DateFormat::YearMonthDay),
                "MM-DD-YYYY" => Some(DateFormat::MonthDayYear),
                "DD-MM-YYYY" => Some(DateFormat::DayMonthYear),
                _ => None,
            }
        }

        pub fn render(self, date: NaiveDate) -> String {
            match self {
                DateFormat::YearMonthDay => {
                    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
                }
                DateFormat::MonthDayYear => {
                    format!("{:02}-{:02}-{:04}", date.month(), date.day(), date.year())
                }
                DateFormat::DayMonthYear => {
                    format!("{:02}-{:02}-{:04}", date.day(), date.month(), date.year())
                }
            }
        }
    }

    /// The primary format first, then the remaining accepted layouts. Parse
    /// attempts run in this order, so the primary wins ambiguous text.
    pub fn accepted_date_formats(primary: DateFormat) -> Vec<DateFormat> {
        let mut out = vec![primary];
        for format in [
            DateFormat::YearMonthDay,
            DateFormat::MonthDayYear,
            DateFormat::DayMonthYear,
        ] {
            if !out.contains(&format) {
                out.push(format);
            }
        }
        out
    }

    /* ------------------------------ Repeaters ----------------------------- */

    /// `+` (from the scheduled date), `++` (from the scheduled date, repeated
    /// until the result lands after today), `.+` (from today).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeaterKind {
        Cumulate,
        CatchUp,
        Restart,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RepeatUnit {
        Day,
        Week,
        Month,
        Year,
    }

    /// Recurrence cadence carried by a timestamp, like `+1w` or `.+2d`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Repeater {
        pub kind: RepeaterKind,
        pub count: u32,
        pub unit: RepeatUnit,
    }

    impl Repeater {
        pub fn render(self) -> String {
            let kind = match self.kind {
                RepeaterKind::Cumulate => "+",
                RepeaterKind::CatchUp => "++",
                RepeaterKind::Restart => ".+",
            };
            let unit = match self.unit {
                RepeatUnit::Day => 'd',
                RepeatUnit::Week => 'w',
                RepeatUnit::Month => 'm',
                RepeatUnit::Year => 'y',
            };
            format!("{kind}{}{unit}", self.count)
        }
    }

    fn add_cadence(date: NaiveDate, repeater: Repeater) -> Option<NaiveDate> {
        match repeater.unit {
            RepeatUnit::Day => date.checked_add_days(Days::new(repeater.count as u64)),
            RepeatUnit::Week => date.checked_add_days(Days::new(repeater.count as u64 * 7)),
            RepeatUnit::Month => date.checked_add_months(Months::new(repeater.count)),
            RepeatUnit::Year => date.checked_add_months(Months::new(repeater.count.checked_mul(12)?)),
        }
    }

    /// Next occurrence after completing a repeatered task. Month and year
    /// cadences clamp to the end of shorter months.
    pub fn advance_date_by_repeater(
        date: NaiveDate,
        repeater: Repeater,
        today: NaiveDate,
    ) -> Option<NaiveDate> {
        match repeater.kind {
            RepeaterKind::Cumulate => add_cadence(date, repeater),
            RepeaterKind::Restart => add_cadence(today, repeater),
            RepeaterKind::CatchUp => {
                let mut next = add_cadence(date, repeater)?;
                while next <= today {
                    next = add_cadence(next, repeater)?;
                }
                Some(next)
            }
        }
    }

    /* ------------------------------ Timestamps ---------------------------- */

    /// A parsed timestamp. `has_weekday` records whether the source spelled
    /// the weekday, so rewrites keep the original shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Timestamp {
        pub date: NaiveDate,
        pub has_weekday: bool,
        pub time: Option<NaiveTime>,
        pub repeater: Option<Repeater>,
    }

    impl Timestamp {
        pub fn date_only(date: NaiveDate) -> Self {
            Self {
                date,
                has_weekday: true,
                time: None,
                repeater: None,
            }
        }

        /// Render under a layout: date, weekday, `H:MM` time, repeater.
        pub fn render(&self, format: DateFormat) -> String {
            let mut out = format.render(self.date);
            if self.has_weekday {
                out.push(' ');
                out.push_str(weekday_abbrev(self.date));
            }
            if let Some(time) = self.time {
                out.push_str(&format!(" {}:{:02}", time.hour(), time.minute()));
            }
            if let Some(repeater) = self.repeater {
                out.push(' ');
                out.push_str(&repeater.render());
            }
            out
        }
    }

    const WEEKDAY_ABBREVS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    pub fn weekday_abbrev(date: NaiveDate) -> &'static str {
        WEEKDAY_ABBREVS[date.weekday().num_days_from_monday() as usize]
    }

    fn context_error<'a>(input: &'a str, label: &'static str) -> nom::Err<VerboseError<&'a str>> {
        nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context(label))],
        })
    }

    /// Exactly `m..=n` ASCII digits; longer runs are rejected rather than
    /// split, which is what keeps the layouts strict.
    fn take_digits<'a>(m: usize, n: usize) -> impl Fn(&'a str) -> PResult<'a, &'a str> {
        move |input: &str| {
            let (rest, run) = take_while(|c: char| c.is_ascii_digit())(input)?;
            if run.len() < m || run.len() > n {
                Err(context_error(input, "digit run"))
            } else {
                Ok((rest, run))
            }
        }
    }

    fn ymd(y: &str, m: &str, d: &str) -> Result<NaiveDate, &'static str> {
        let year: i32 = y.parse().map_err(|_| "year")?;
        let month: u32 = m.parse().map_err(|_| "month")?;
        let day: u32 = d.parse().map_err(|_| "day")?;
        NaiveDate::from_ymd_opt(year, month, day).ok_or("invalid calendar date")
    }

    fn parse_date_with<'a>(format: DateFormat) -> impl Fn(&'a str) -> PResult<'a, NaiveDate> {
        move |input: &'a str| match format {
            DateFormat::YearMonthDay => map_res(
                tuple((
                    take_digits(4, 4),
                    nom_char('-'),
                    take_digits(2, 2),
                    nom_char('-'),
                    take_digits(2, 2),
                )),
                |(y, _, m, _, d)| ymd(y, m, d),
            )(input),
            DateFormat::MonthDayYear => map_res(
                tuple((
                    take_digits(2, 2),
                    nom_char('-'),
                    take_digits(2, 2),
                    nom_char('-'),
                    take_digits(4, 4),
                )),
                |(m, _, d, _, y)| ymd(y, m, d),
            )(input),
            DateFormat::DayMonthYear => map_res(
                tuple((
                    take_digits(2, 2),
                    nom_char('-'),
                    take_digits(2, 2),
                    nom_char('-'),
                    take_digits(4, 4),
                )),
                |(d, _, m, _, y)| ymd(y, m, d),
            )(input),
        }
    }

    fn parse_weekday(input: &str) -> PResult<'_, &str> {
        let (rest, word) = take_while1(|c: char| c.is_ascii_alphabetic())(input)?;
        if word.len() == 3 && WEEKDAY_ABBREVS.iter().any(|a| a.eq_ignore_ascii_case(word)) {
            Ok((rest, word))
        } else {
            Err(context_error(input, "weekday"))
        }
    }

    fn parse_time(input: &str) -> PResult<'_, NaiveTime> {
        map_res(
            tuple((take_digits(1, 2), nom_char(':'), take_digits(2, 2))),
            |(h, _, m)| {
                let hour: u32 = h.parse().map_err(|_| "hour")?;
                let minute: u32 = m.parse().map_err(|_| "minute")?;
                NaiveTime::from_hms_opt(hour, minute, 0).ok_or("invalid time")
            },
        )(input)
    }

    fn parse_repeater_token(input: &str) -> PResult<'_, Repeater> {
        let (input, kind) = alt((
            map(tag("++"), |_| RepeaterKind::CatchUp),
            map(tag(".+"), |_| RepeaterKind::Restart),
            map(tag("+"), |_| RepeaterKind::Cumulate),
        ))(input)?;
        let (input, count) = map_res(take_digits(1, 4), |s: &str| {
            let n: u32 = s.parse().map_err(|_| "count")?;
            if n == 0 {
                Err("count")
            } else {
                Ok(n)
            }
        })(input)?;
        let (input, unit) = alt((
            map(nom_char('d'), |_| RepeatUnit::Day),
            map(nom_char('w'), |_| RepeatUnit::Week),
            map(nom_char('m'), |_| RepeatUnit::Month),
            map(nom_char('y'), |_| RepeatUnit::Year),
        ))(input)?;
        Ok((input, Repeater { kind, count, unit }))
    }

    fn parse_timestamp_with<'a>(format: DateFormat) -> impl Fn(&'a str) -> PResult<'a, Timestamp> {
        move |input: &'a str| {
            let (input, date) = parse_date_with(format)(input)?;
            let (input, weekday) = opt(preceded(space1, parse_weekday))(input)?;
            let (input, time) = opt(preceded(space1, parse_time))(input)?;
            let (input, repeater) = opt(preceded(space1, parse_repeater_token))(input)?;
            if let Some(day) = weekday {
                if !day.eq_ignore_ascii_case(weekday_abbrev(date)) {
                    return Err(context_error(input, "weekday mismatch"));
                }
            }
            Ok((
                input,
                Timestamp {
                    date,
                    has_weekday: weekday.is_some(),
                    time,
                    repeater,
                },
            ))
        }
    }

    fn strip_wrapper(text: &str) -> &str {
        let bytes = text.as_bytes();
        if bytes.len() >= 2 {
            let wrapped = (bytes[0] == b'<' && bytes[bytes.len() - 1] == b'>')
                || (bytes[0] == b'[' && bytes[bytes.len() - 1] == b']');
            if wrapped {
                return &text[1..text.len() - 1];
            }
        }
        text
    }

    /// Strict parse against the accepted layouts, first full match wins. A
    /// `<...>` or `[...]` wrapper is tolerated. Returns the matched layout
    /// alongside the timestamp; anything else is `None`, never an error.
    pub fn parse_timestamp(text: &str, formats: &[DateFormat]) -> Option<(Timestamp, DateFormat)> {
        let inner = strip_wrapper(text.trim());
        if inner.is_empty() {
            return None;
        }
        for &format in formats {
            if let Ok((rest, ts)) = parse_timestamp_with(format)(inner) {
                if rest.trim().is_empty() {
                    return Some((ts, format));
                }
            }
        }
        None
    }

    /// Date-only strict parse: a weekday is allowed, a time or repeater is not.
    pub fn parse_plain_date(text: &str, formats: &[DateFormat]) -> Option<NaiveDate> {
        let (ts, _) = parse_timestamp(text, formats)?;
        (ts.time.is_none() && ts.repeater.is_none()).then_some(ts.date)
    }

    /// Extract the repeater token from timestamp text, if any.
    pub fn parse_repeater(text: &str) -> Option<Repeater> {
        for word in strip_wrapper(text.trim()).split_whitespace() {
            if let Ok(("", repeater)) = parse_repeater_token(word) {
                return Some(repeater);
            }
        }
        None
    }

    /// Parse a timestamp value, transform it, and re-render it under the same
    /// layout and bracket wrapper. `None` when the value does not parse or the
    /// transform declines.
    pub fn rewrite_timestamp_value(
        value: &str,
        formats: &[DateFormat],
        rewrite: impl FnOnce(Timestamp) -> Option<Timestamp>,
    ) -> Option<String> {
        let (ts, format) = parse_timestamp(value, formats)?;
        let rendered = rewrite(ts)?.render(format);
        let trimmed = value.trim();
        Some(if trimmed.starts_with('<') {
            format!("<{rendered}>")
        } else if trimmed.starts_with('[') {
            format!("[{rendered}]")
        } else {
            rendered
        })
    }

    /* ------------------------------- Planning ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PlanningKind {
        Scheduled,
        Deadline,
        Closed,
    }

    impl PlanningKind {
        pub fn token(self) -> &'static str {
            match self {
                PlanningKind::Scheduled => "SCHEDULED",
                PlanningKind::Deadline => "DEADLINE",
                PlanningKind::Closed => "CLOSED",
            }
        }
    }

    static PLANNING_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(SCHEDULED|DEADLINE|CLOSED):").expect("invalid planning token regex")
    });

    static PLANNING_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[ \t]*(SCHEDULED|DEADLINE|CLOSED):").expect("invalid planning line regex")
    });

    /// Whether the line is planning-shaped: it starts with a planning token.
    pub fn is_planning_line(line: &str) -> bool {
        PLANNING_LINE_RE.is_match(line)
    }

    /// One planning token on a line, with the byte span of its value text
    /// (which runs to the next token or end of line, whitespace-trimmed).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PlanningToken {
        pub kind: PlanningKind,
        pub token_start: usize,
        pub value_start: usize,
        pub value_end: usize,
    }

    pub fn planning_tokens(line: &str) -> Vec<PlanningToken> {
        // a trailing :TAG: cluster is never part of a planning value
        let line_end = crate::checkbox::trailing_tag_cluster(line)
            .map(|(ws_start, _)| ws_start)
            .unwrap_or(line.len());
        let mut found: Vec<(PlanningKind, usize, usize)> = Vec::new();
        for caps in PLANNING_TOKEN_RE.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() >= line_end {
                continue;
            }
            let kind = match caps.get(1).map(|m| m.as_str()) {
                Some("SCHEDULED") => PlanningKind::Scheduled,
                Some("DEADLINE") => PlanningKind::Deadline,
                Some("CLOSED") => PlanningKind::Closed,
                _ => continue,
            };
            found.push((kind, whole.start(), whole.end()));
        }
        let mut out = Vec::with_capacity(found.len());
        for (i, (kind, token_start, token_end)) in found.iter().enumerate() {
            let limit = found.get(i + 1).map(|next| next.1).unwrap_or(line_end);
            let raw = &line[*token_end..limit];
            let leading = raw.len() - raw.trim_start().len();
            let trailing = raw.len() - raw.trim_end().len();
            let value_start = token_end + leading;
            let value_end = (limit - trailing).max(value_start);
            out.push(PlanningToken {
                kind: *kind,
                token_start: *token_start,
                value_start,
                value_end,
            });
        }
        out
    }

    /// Resolve a selected line to the single planning line an edit may target:
    /// a planning line is itself; a heading resolves to the line below when
    /// that is planning-shaped, else to itself when it carries an inline
    /// planning fragment.
    pub fn resolve_planning_target(
        lines: &[String],
        idx: usize,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        if idx >= lines.len() {
            return None;
        }
        if is_planning_line(&lines[idx]) {
            return Some(idx);
        }
        if crate::outline::heading_level(&lines[idx], extra_glyphs).is_some() {
            if idx + 1 < lines.len() && is_planning_line(&lines[idx + 1]) {
                return Some(idx + 1);
            }
            if !planning_tokens(&lines[idx]).is_empty() {
                return Some(idx);
            }
        }
        None
    }

    /* ------------------------------ Reschedule ----------------------------- */

    /// Outcome of a reschedule request over a selection.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct RescheduleOutcome {
        /// Resolved planning line index → rewritten text; one shift per line.
        pub replacements: BTreeMap<usize, String>,
        /// True when a resolved line had a timestamp that failed strict parsing.
        pub warned_parse: bool,
    }

    /// Shift the SCHEDULED and DEADLINE dates of the selected lines by one day
    /// (`forward` picks the direction). Selections resolve to planning lines
    /// first, and a line reached through several selections shifts exactly
    /// once. CLOSED stamps never move.
    pub fn compute_reschedule_replacements(
        lines: &[String],
        target_lines: &[usize],
        forward: bool,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> RescheduleOutcome {
        let mut outcome = RescheduleOutcome::default();
        let mut resolved: Vec<usize> = Vec::new();
        for &target in target_lines {
            if let Some(idx) = resolve_planning_target(lines, target, extra_glyphs) {
                if !resolved.contains(&idx) {
                    resolved.push(idx);
                }
            }
        }
        for idx in resolved {
            let (replacement, failed) = shift_planning_line(&lines[idx], forward, formats);
            if let Some(text) = replacement {
                outcome.replacements.insert(idx, text);
            }
            if failed {
                outcome.warned_parse = true;
            }
        }
        outcome
    }

    fn shift_planning_line(
        line: &str,
        forward: bool,
        formats: &[DateFormat],
    ) -> (Option<String>, bool) {
        let tokens = planning_tokens(line);
        let shiftable: Vec<&PlanningToken> = tokens
            .iter()
            .filter(|t| t.kind != PlanningKind::Closed)
            .collect();
        if shiftable.is_empty() {
            return (None, false);
        }
        let mut text = line.to_string();
        let mut changed = false;
        let mut failed = false;
        // rewrite back to front so earlier byte offsets stay valid
        for token in shiftable.iter().rev() {
            let value = &line[token.value_start..token.value_end];
            let rewritten = rewrite_timestamp_value(value, formats, |ts| {
                let date = if forward {
                    ts.date.checked_add_days(Days::new(1))
                } else {
                    ts.date.checked_sub_days(Days::new(1))
                }?;
                Some(Timestamp { date, ..ts })
            });
            match rewritten {
                Some(rendered) => {
                    text.replace_range(token.value_start..token.value_end, &rendered);
                    changed = true;
                }
                None => failed = true,
            }
        }
        (changed.then_some(text), failed)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn iso() -> Vec<DateFormat> {
            accepted_date_formats(DateFormat::YearMonthDay)
        }

        fn date(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
        }

        fn doc(lines: &[&str]) -> Vec<String> {
            lines.iter().map(|l| l.to_string()).collect()
        }

        #[test]
        fn accepted_formats_put_the_primary_first() {
            assert_eq!(
                accepted_date_formats(DateFormat::DayMonthYear),
                vec![
                    DateFormat::DayMonthYear,
                    DateFormat::YearMonthDay,
                    DateFormat::MonthDayYear,
                ]
            );
            assert_eq!(accepted_date_formats(DateFormat::YearMonthDay).len(), 3);
        }

        #[test]
        fn valid_timestamps_parse_with_weekday_verification() {
            let (ts, format) = parse_timestamp("2026-01-10 Sat", &iso()).unwrap();
            assert_eq!(ts.date, date(2026, 1, 10));
            assert!(ts.has_weekday);
            assert_eq!(format, DateFormat::YearMonthDay);

            // weekday that contradicts the calendar invalidates the stamp
            assert_eq!(parse_timestamp("2026-01-10 Mon", &iso()), None);
            // lowercase weekday is fine
            assert!(parse_timestamp("2026-01-10 sat", &iso()).is_some());
        }

        #[test]
        fn impossible_dates_and_loose_text_are_invalid() {
            assert_eq!(parse_timestamp("2026-13-01", &iso()), None);
            assert_eq!(parse_timestamp("2026-01-45", &iso()), None);
            assert_eq!(parse_timestamp("2026-1-10", &iso()), None);
            assert_eq!(parse_timestamp("", &iso()), None);
            assert_eq!(parse_timestamp("next tuesday", &iso()), None);
            assert_eq!(parse_timestamp("2026-01-10 Sat trailing", &iso()), None);
        }

        #[test]
        fn legacy_layouts_still_parse_under_an_iso_primary() {
            let (ts, format) = parse_timestamp("01-10-2026", &iso()).unwrap();
            assert_eq!(ts.date, date(2026, 1, 10));
            assert_eq!(format, DateFormat::MonthDayYear);
        }

        #[test]
        fn weekday_disambiguates_between_legacy_layouts() {
            // Jan 10 2026 is a Saturday, so MM-DD fails and DD-MM (Oct 1,
            // a Thursday) wins.
            let (ts, format) = parse_timestamp("01-10-2026 Thu", &iso()).unwrap();
            assert_eq!(ts.date, date(2026, 10, 1));
            assert_eq!(format, DateFormat::DayMonthYear);
        }

        #[test]
        fn times_and_repeaters_ride_along() {
            let (ts, _) = parse_timestamp("2026-01-10 Sat 9:05 +1w", &iso()).unwrap();
            assert_eq!(ts.time, NaiveTime::from_hms_opt(9, 5, 0));
            assert_eq!(
                ts.repeater,
                Some(Repeater {
                    kind: RepeaterKind::Cumulate,
                    count: 1,
                    unit: RepeatUnit::Week,
                })
            );
            let (ts, _) = parse_timestamp("<2026-01-10 .+2d>", &iso()).unwrap();
            assert_eq!(ts.repeater.map(|r| r.kind), Some(RepeaterKind::Restart));
            assert!(!ts.has_weekday);
            assert_eq!(parse_timestamp("2026-01-10 25:00", &iso()), None);
        }

        #[test]
        fn render_round_trips_shape() {
            let ts = Timestamp {
                date: date(2026, 1, 10),
                has_weekday: true,
                time: NaiveTime::from_hms_opt(9, 5, 0),
                repeater: Some(Repeater {
                    kind: RepeaterKind::CatchUp,
                    count: 2,
                    unit: RepeatUnit::Month,
                }),
            };
            assert_eq!(ts.render(DateFormat::YearMonthDay), "2026-01-10 Sat 9:05 ++2m");
            assert_eq!(
                Timestamp::date_only(date(2026, 1, 11)).render(DateFormat::MonthDayYear),
                "01-11-2026 Sun"
            );
        }

        #[test]
        fn repeater_advancement_follows_the_kind() {
            let today = date(2026, 2, 3);
            let cumulate = Repeater {
                kind: RepeaterKind::Cumulate,
                count: 1,
                unit: RepeatUnit::Week,
            };
            assert_eq!(
                advance_date_by_repeater(date(2026, 1, 10), cumulate, today),
                Some(date(2026, 1, 17))
            );

            let restart = Repeater {
                kind: RepeaterKind::Restart,
                count: 2,
                unit: RepeatUnit::Day,
            };
            assert_eq!(
                advance_date_by_repeater(date(2026, 1, 10), restart, today),
                Some(date(2026, 2, 5))
            );

            let catch_up = Repeater {
                kind: RepeaterKind::CatchUp,
                count: 1,
                unit: RepeatUnit::Month,
            };
            assert_eq!(
                advance_date_by_repeater(date(2025, 11, 10), catch_up, today),
                Some(date(2026, 2, 10))
            );
        }

        #[test]
        fn month_cadence_clamps_at_short_months() {
            let cumulate = Repeater {
                kind: RepeaterKind::Cumulate,
                count: 1,
                unit: RepeatUnit::Month,
            };
            assert_eq!(
                advance_date_by_repeater(date(2026, 1, 31), cumulate, date(2026, 1, 1)),
                Some(date(2026, 2, 28))
            );
        }

        #[test]
        fn planning_tokens_carry_value_spans() {
            let line = "  DEADLINE: <2026-01-12 Mon> SCHEDULED: 2026-01-10 Sat";
            let tokens = planning_tokens(line);
            assert_eq!(tokens.len(), 2);
            assert_eq!(tokens[0].kind, PlanningKind::Deadline);
            assert_eq!(
                &line[tokens[0].value_start..tokens[0].value_end],
                "<2026-01-12 Mon>"
            );
            assert_eq!(
                &line[tokens[1].value_start..tokens[1].value_end],
                "2026-01-10 Sat"
            );
            assert!(is_planning_line(line));
            assert!(!is_planning_line("* SCHEDULED in a title? no: heading"));

            // trailing tag clusters never belong to a planning value
            let tagged = "** TODO Call mom SCHEDULED: 2026-01-10 Sat :home:";
            let tokens = planning_tokens(tagged);
            assert_eq!(
                &tagged[tokens[0].value_start..tokens[0].value_end],
                "2026-01-10 Sat"
            );
        }

        #[test]
        fn reschedule_shifts_each_resolved_line_once() {
            let lines = doc(&[
                "* TODO Pay rent",
                "  SCHEDULED: 2026-01-10 Sat",
                "plain line",
            ]);
            // heading and its planning line both selected: one shift only
            let outcome =
                compute_reschedule_replacements(&lines, &[0, 1], true, &iso(), &[]);
            assert_eq!(outcome.replacements.len(), 1);
            assert_eq!(
                outcome.replacements[&1],
                "  SCHEDULED: 2026-01-11 Sun"
            );
            assert!(!outcome.warned_parse);

            let back = compute_reschedule_replacements(&lines, &[1], false, &iso(), &[]);
            assert_eq!(back.replacements[&1], "  SCHEDULED: 2026-01-09 Fri");
        }

        #[test]
        fn reschedule_keeps_wrappers_times_and_repeaters() {
            let lines = doc(&["  SCHEDULED: <2026-01-10 Sat 9:30 +1w>"]);
            let outcome = compute_reschedule_replacements(&lines, &[0], true, &iso(), &[]);
            assert_eq!(
                outcome.replacements[&0],
                "  SCHEDULED: <2026-01-11 Sun 9:30 +1w>"
            );
        }

        #[test]
        fn reschedule_targets_inline_fragments_on_the_heading() {
            let lines = doc(&["** TODO Call mom SCHEDULED: 2026-01-10 Sat"]);
            let outcome = compute_reschedule_replacements(&lines, &[0], true, &iso(), &[]);
            assert_eq!(
                outcome.replacements[&0],
                "** TODO Call mom SCHEDULED: 2026-01-11 Sun"
            );
        }

        #[test]
        fn unparseable_planning_values_warn_without_edits() {
            let lines = doc(&["  SCHEDULED: someday", "* TODO no planning at all"]);
            let outcome =
                compute_reschedule_replacements(&lines, &[0, 1], true, &iso(), &[]);
            assert!(outcome.replacements.is_empty());
            assert!(outcome.warned_parse);
        }

        #[test]
        fn closed_stamps_never_shift() {
            let lines = doc(&["  CLOSED: [2026-01-10 Sat 9:30] SCHEDULED: 2026-01-10 Sat"]);
            let outcome = compute_reschedule_replacements(&lines, &[0], true, &iso(), &[]);
            assert_eq!(
                outcome.replacements[&0],
                "  CLOSED: [2026-01-10 Sat 9:30] SCHEDULED: 2026-01-11 Sun"
            );
        }

        #[test]
        fn repeater_extraction_from_raw_text() {
            let repeater = parse_repeater("<2026-01-10 Sat +3d>").unwrap();
            assert_eq!(repeater.count, 3);
            assert_eq!(repeater.unit, RepeatUnit::Day);
            assert_eq!(parse_repeater("2026-01-10 Sat"), None);
            assert_eq!(parse_repeater("+0w"), None);
        }
    }
}

pub mod journal {
    //! Day-structured documents: day headings whose titles are calendar dates,
    //! keyword-independent task identity, and forwarding of continued tasks
    //! into the next day's section.

    use crate::checkbox::{find_checkbox_cookie, remove_checkbox_cookie, trailing_tag_cluster};
    use crate::dates::{
        is_planning_line, parse_plain_date, parse_timestamp, planning_tokens, DateFormat,
        PlanningKind, Timestamp,
    };
    use crate::edit::LineEdit;
    use crate::outline::{block_extent, heading_level, heading_title};
    use crate::workflow::{AgendaVisibility, WorkflowRegistry};
    use chrono::{Days, NaiveDate};
    use serde::Serialize;

    /* ---------------------------- Day headings ---------------------------- */

    /// Parse a level-1 heading whose title is a calendar date. A trailing tag
    /// cluster or cookie does not disqualify the heading.
    pub fn parse_day_heading(
        line: &str,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Option<NaiveDate> {
        if heading_level(line, extra_glyphs)? != 1 {
            return None;
        }
        let title = heading_title(line, extra_glyphs)?;
        let mut text = match trailing_tag_cluster(title) {
            Some((ws_start, _)) => &title[..ws_start],
            None => title,
        };
        if let Some(cookie) = find_checkbox_cookie(text) {
            if text[cookie.end..].trim().is_empty() {
                text = &text[..cookie.start];
            }
        }
        parse_plain_date(text.trim(), formats)
    }

    /// Render a fresh day-heading line for a date.
    pub fn build_day_heading(date: NaiveDate, format: DateFormat) -> String {
        format!("* {}", Timestamp::date_only(date).render(format))
    }

    /// Nearest day heading at or above the index.
    pub fn find_containing_day_heading(
        lines: &[String],
        idx: usize,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Option<(usize, NaiveDate)> {
        if idx >= lines.len() {
            return None;
        }
        for i in (0..=idx).rev() {
            if let Some(date) = parse_day_heading(&lines[i], formats, extra_glyphs) {
                return Some((i, date));
            }
        }
        None
    }

    /// First day heading strictly after the index.
    pub fn find_next_day_heading(
        lines: &[String],
        after: usize,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Option<(usize, NaiveDate)> {
        for i in (after + 1)..lines.len() {
            if let Some(date) = parse_day_heading(&lines[i], formats, extra_glyphs) {
                return Some((i, date));
            }
        }
        None
    }

    /// The line directly below a heading when it is planning-shaped.
    pub fn immediate_planning_line(lines: &[String], heading_idx: usize) -> Option<usize> {
        let next = heading_idx + 1;
        (next < lines.len() && is_planning_line(&lines[next])).then_some(next)
    }

    /// Remove inline `SCHEDULED`/`DEADLINE`/`CLOSED` fragments from a line,
    /// keeping any trailing tag cluster intact.
    pub fn strip_inline_planning(line: &str) -> String {
        let tokens = planning_tokens(line);
        if tokens.is_empty() {
            return line.to_string();
        }
        let mut text = line.to_string();
        for token in tokens.iter().rev() {
            let mut start = token.token_start;
            while start > 0 && matches!(text.as_bytes()[start - 1], b' ' | b'\t') {
                start -= 1;
            }
            text.replace_range(start..token.value_end, "");
        }
        text.trim_end().to_string()
    }

    /* ---------------------------- Task identity ---------------------------- */

    /// Keyword-independent task signature used to match "the same task" across
    /// two day sections: normalized title plus sorted tag set.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TaskIdentifier {
        pub title: String,
        pub tags: Vec<String>,
    }

    /// Identity of a heading-line task. The keyword, inline planning fragments,
    /// and any cookie are dropped; the remaining title is case-folded and
    /// whitespace-collapsed.
    pub fn task_identifier(
        line: &str,
        registry: &WorkflowRegistry,
        extra_glyphs: &[char],
    ) -> Option<TaskIdentifier> {
        let stripped = strip_inline_planning(line);
        let stripped = remove_checkbox_cookie(&stripped);
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let title = heading_title(&stripped, &glyphs)?;
        let (title, tags) = match trailing_tag_cluster(title) {
            Some((ws_start, cluster)) => {
                let mut tags: Vec<String> = cluster
                    .split(':')
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_ascii_lowercase())
                    .collect();
                tags.sort();
                (&title[..ws_start], tags)
            }
            None => (title, Vec::new()),
        };
        let mut words = title.split_whitespace().peekable();
        if let Some(first) = words.peek() {
            if registry.is_known_state(first) {
                words.next();
            }
        }
        let normalized = words
            .map(|w| w.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        Some(TaskIdentifier {
            title: normalized,
            tags,
        })
    }

    /// Locate a task under a day heading whose identifier matches, scanning
    /// only task-shaped headings in the day's extent.
    pub fn find_forwarded_task(
        lines: &[String],
        day_idx: usize,
        needle: &TaskIdentifier,
        registry: &WorkflowRegistry,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let extent = block_extent(lines, day_idx, &glyphs);
        for idx in (day_idx + 1)..extent.end {
            if registry.heading_keyword(&lines[idx]).is_none() {
                continue;
            }
            if task_identifier(&lines[idx], registry, extra_glyphs).as_ref() == Some(needle) {
                return Some(idx);
            }
        }
        None
    }

    /// Index of the last task heading inside a day heading's extent; the
    /// forwarded copy is appended after that task's block.
    pub fn find_last_task_line_under_heading(
        lines: &[String],
        day_idx: usize,
        registry: &WorkflowRegistry,
        extra_glyphs: &[char],
    ) -> Option<usize> {
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let extent = block_extent(lines, day_idx, &glyphs);
        let mut last = None;
        for idx in (day_idx + 1)..extent.end {
            if registry.heading_keyword(&lines[idx]).is_some() {
                last = Some(idx);
            }
        }
        last
    }

    /* ----------------------------- Forwarding ------------------------------ */

    /// Copy a continued task under the next day heading. The duplicate enters
    /// the cycle's initial keyword with `SCHEDULED` set to that day's date; when
    /// no next day heading exists one is appended for the following calendar
    /// day. Returns `None` when the line is not a task heading or lies under no
    /// day heading, and an empty edit set when the task is already forwarded.
    pub fn compute_forward_edits(
        lines: &[String],
        task_idx: usize,
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Option<Vec<LineEdit>> {
        if task_idx >= lines.len() {
            return None;
        }
        registry.heading_keyword(&lines[task_idx])?;
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let level = heading_level(&lines[task_idx], &glyphs)?;
        let (day_idx, day_date) =
            find_containing_day_heading(lines, task_idx, formats, &glyphs)?;
        let identifier = task_identifier(&lines[task_idx], registry, extra_glyphs)?;
        let primary = formats.first().copied().unwrap_or(DateFormat::YearMonthDay);

        let (target_date, insert_at, day_line) =
            match find_next_day_heading(lines, day_idx, formats, &glyphs) {
                Some((next_idx, next_date)) => {
                    if find_forwarded_task(lines, next_idx, &identifier, registry, extra_glyphs)
                        .is_some()
                    {
                        return Some(Vec::new());
                    }
                    let insert_at = match find_last_task_line_under_heading(
                        lines,
                        next_idx,
                        registry,
                        extra_glyphs,
                    ) {
                        Some(last_task) => block_extent(lines, last_task, &glyphs).end,
                        None => next_idx + 1,
                    };
                    (next_date, insert_at, None)
                }
                None => {
                    let date = day_date.checked_add_days(Days::new(1))?;
                    (date, lines.len(), Some(build_day_heading(date, primary)))
                }
            };

        let bare = strip_inline_planning(&lines[task_idx]);
        let duplicate =
            registry.rewrite_heading_for_state(&bare, registry.initial_state(), extra_glyphs)?;
        let stamp = Timestamp::date_only(target_date).render(primary);
        let scheduled = format!("{}SCHEDULED: {stamp}", " ".repeat(level + 1));

        let mut payload = Vec::with_capacity(3);
        if let Some(day_line) = day_line {
            payload.push(day_line);
        }
        payload.push(duplicate);
        payload.push(scheduled);
        Some(vec![LineEdit::Insert {
            at: insert_at,
            lines: payload,
        }])
    }

    /// After a forwarded task completes, delete its still-open duplicate under
    /// the next day heading. A duplicate that reached a done-like state on its
    /// own is left in place.
    pub fn compute_forward_cleanup_edits(
        lines: &[String],
        task_idx: usize,
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Option<Vec<LineEdit>> {
        if task_idx >= lines.len() {
            return None;
        }
        registry.heading_keyword(&lines[task_idx])?;
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let identifier = task_identifier(&lines[task_idx], registry, extra_glyphs)?;
        let (day_idx, _) = find_containing_day_heading(lines, task_idx, formats, &glyphs)?;
        let (next_idx, _) = find_next_day_heading(lines, day_idx, formats, &glyphs)?;
        let dup = find_forwarded_task(lines, next_idx, &identifier, registry, extra_glyphs)?;
        let keyword = registry.heading_keyword(&lines[dup])?;
        if registry.is_done_like(keyword) {
            return None;
        }
        let end = match immediate_planning_line(lines, dup) {
            Some(planning) => planning + 1,
            None => dup + 1,
        };
        Some(vec![LineEdit::Delete { start: dup, end }])
    }

    /* ------------------------------ Scanning ------------------------------- */

    /// One task heading found by a document scan.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TaskRow {
        pub line: usize,
        pub day: Option<NaiveDate>,
        pub keyword: String,
        pub title: String,
        pub tags: Vec<String>,
        pub scheduled: Option<NaiveDate>,
        pub deadline: Option<NaiveDate>,
        pub done_like: bool,
        pub visible: bool,
    }

    /// Every task heading in the document, tagged with its containing day and
    /// its planning dates.
    pub fn scan_tasks(
        lines: &[String],
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
    ) -> Vec<TaskRow> {
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let mut day: Option<NaiveDate> = None;
        let mut out = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(date) = parse_day_heading(line, formats, &glyphs) {
                day = Some(date);
                continue;
            }
            let Some(keyword) = registry.heading_keyword(line) else {
                continue;
            };
            let stripped = strip_inline_planning(line);
            let stripped = remove_checkbox_cookie(&stripped);
            let full_title = heading_title(&stripped, &glyphs).unwrap_or_default();
            let (title_text, tags) = match trailing_tag_cluster(full_title) {
                Some((ws_start, cluster)) => (
                    &full_title[..ws_start],
                    cluster
                        .split(':')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect(),
                ),
                None => (full_title, Vec::new()),
            };
            let title = title_text.trim_start_matches(keyword).trim().to_string();
            let (scheduled, deadline) = planning_dates(lines, idx, formats);
            let visible = registry
                .state(keyword)
                .map(|s| s.agenda == AgendaVisibility::Visible)
                .unwrap_or(true);
            out.push(TaskRow {
                line: idx,
                day,
                keyword: keyword.to_ascii_uppercase(),
                title,
                tags,
                scheduled,
                deadline,
                done_like: registry.is_done_like(keyword),
                visible,
            });
        }
        out
    }

    /// First SCHEDULED and DEADLINE dates attached to a heading, inline or on
    /// its planning line.
    fn planning_dates(
        lines: &[String],
        heading_idx: usize,
        formats: &[DateFormat],
    ) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let mut scheduled = None;
        let mut deadline = None;
        let mut sites = vec![heading_idx];
        if let Some(pidx) = immediate_planning_line(lines, heading_idx) {
            sites.push(pidx);
        }
        for site in sites {
            for token in planning_tokens(&lines[site]) {
                let value = &lines[site][token.value_start..token.value_end];
                let Some((ts, _)) = parse_timestamp(value, formats) else {
                    continue;
                };
                match token.kind {
                    PlanningKind::Scheduled if scheduled.is_none() => scheduled = Some(ts.date),
                    PlanningKind::Deadline if deadline.is_none() => deadline = Some(ts.date),
                    _ => {}
                }
            }
        }
        (scheduled, deadline)
    }

}

pub mod transition {
    //! Workflow transitions over a document: keyword cycling, CLOSED stamping,
    //! repeater advancement on completion, and the continued-task hooks.
    //!
    //! A transition computes one edit batch. Entering a stamping state writes a
    //! `CLOSED:` line directly below the task; leaving one removes or strips
    //! the stamp it left. Completing a repeatered task instead advances its
    //! `SCHEDULED` date and reverts the keyword to the cycle's initial state.

    use crate::dates::{
        advance_date_by_repeater, parse_timestamp, planning_tokens, rewrite_timestamp_value,
        DateFormat, PlanningKind, PlanningToken, Timestamp,
    };
    use crate::edit::LineEdit;
    use crate::journal::{
        compute_forward_cleanup_edits, compute_forward_edits, immediate_planning_line,
    };
    use crate::outline::{enclosing_heading, heading_level};
    use crate::workflow::{CycleDirection, WorkflowRegistry};
    use chrono::NaiveDateTime;

    /// The keyword whose entry forwards the task into the next day's section.
    pub const CONTINUED_KEYWORD: &str = "CONTINUED";

    /// Result of one workflow transition.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TransitionOutcome {
        pub edits: Vec<LineEdit>,
        /// Keyword actually written to the heading.
        pub landed: String,
        /// Keyword the caller asked for; differs from `landed` when a repeater
        /// reverted the task to the cycle's initial state.
        pub requested: String,
        pub repeated: bool,
    }

    /// Rotate the task at the cursor one step through the cycle.
    pub fn compute_cycle_edits(
        lines: &[String],
        cursor: usize,
        direction: CycleDirection,
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
        now: NaiveDateTime,
    ) -> Option<TransitionOutcome> {
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let heading = enclosing_heading(lines, cursor, &glyphs)?;
        let current = registry.heading_keyword(&lines[heading]);
        let target = registry.next_state(current, direction).keyword.clone();
        compute_state_change_edits(lines, heading, &target, registry, formats, extra_glyphs, now)
    }

    /// Move the task at the cursor into a specific state.
    pub fn compute_state_change_edits(
        lines: &[String],
        cursor: usize,
        target_keyword: &str,
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
        now: NaiveDateTime,
    ) -> Option<TransitionOutcome> {
        let glyphs = registry.outline_glyphs(extra_glyphs);
        let heading_idx = enclosing_heading(lines, cursor, &glyphs)?;
        let level = heading_level(&lines[heading_idx], &glyphs)?;
        let target = registry.state(target_keyword)?;
        let current_stamps = registry
            .heading_keyword(&lines[heading_idx])
            .map(|kw| registry.stamps_closed(kw))
            .unwrap_or(false);
        let primary = formats.first().copied().unwrap_or(DateFormat::YearMonthDay);
        let mut edits = Vec::new();

        if target.is_done_like {
            if let Some(outcome) = complete_with_repeater(
                lines,
                heading_idx,
                target_keyword,
                registry,
                formats,
                extra_glyphs,
                now,
            ) {
                return Some(outcome);
            }
        }

        if let Some(rebuilt) =
            registry.rewrite_heading_for_state(&lines[heading_idx], target, extra_glyphs)
        {
            if rebuilt != lines[heading_idx] {
                edits.push(LineEdit::Replace {
                    line: heading_idx,
                    text: rebuilt,
                });
            }
        }

        if target.stamps_closed {
            match closed_token_below(lines, heading_idx) {
                Some((pidx, token)) => {
                    let stamp = closed_stamp(now, primary);
                    edits.push(LineEdit::Replace {
                        line: pidx,
                        text: replace_token_value(&lines[pidx], &token, &stamp),
                    });
                }
                None => {
                    let stamp = closed_stamp(now, primary);
                    let text = format!("{}CLOSED: {stamp}", " ".repeat(level + 1));
                    edits.push(LineEdit::Insert {
                        at: heading_idx + 1,
                        lines: vec![text],
                    });
                }
            }
        } else if current_stamps {
            edits.extend(remove_closed_below(lines, heading_idx));
        }

        if target.keyword == CONTINUED_KEYWORD {
            if let Some(forward) =
                compute_forward_edits(lines, heading_idx, registry, formats, extra_glyphs)
            {
                edits.extend(forward);
            }
        }
        if target.is_done_like {
            if let Some(cleanup) =
                compute_forward_cleanup_edits(lines, heading_idx, registry, formats, extra_glyphs)
            {
                edits.extend(cleanup);
            }
        }

        Some(TransitionOutcome {
            edits,
            landed: target.keyword.clone(),
            requested: target.keyword.clone(),
            repeated: false,
        })
    }

    /// Completion path for repeatered tasks: advance `SCHEDULED`, revert the
    /// keyword, never stamp. `None` when the task carries no usable repeater.
    fn complete_with_repeater(
        lines: &[String],
        heading_idx: usize,
        target_keyword: &str,
        registry: &WorkflowRegistry,
        formats: &[DateFormat],
        extra_glyphs: &[char],
        now: NaiveDateTime,
    ) -> Option<TransitionOutcome> {
        let current_stamps = registry
            .heading_keyword(&lines[heading_idx])
            .map(|kw| registry.stamps_closed(kw))
            .unwrap_or(false);
        let (line_idx, token, ts) = scheduled_repeater_site(lines, heading_idx, formats)?;
        let repeater = ts.repeater?;
        let next_date = advance_date_by_repeater(ts.date, repeater, now.date())?;
        let mut edits = Vec::new();

        let value = &lines[line_idx][token.value_start..token.value_end];
        let rendered = rewrite_timestamp_value(value, formats, |t| {
            Some(Timestamp {
                date: next_date,
                ..t
            })
        })?;
        let mut advanced = replace_token_value(&lines[line_idx], &token, &rendered);

        let initial = registry.initial_state();
        if line_idx == heading_idx {
            // inline planning shares the heading line; fold the keyword change in
            if let Some(rebuilt) =
                registry.rewrite_heading_for_state(&advanced, initial, extra_glyphs)
            {
                advanced = rebuilt;
            }
        } else if let Some(rebuilt) =
            registry.rewrite_heading_for_state(&lines[heading_idx], initial, extra_glyphs)
        {
            if rebuilt != lines[heading_idx] {
                edits.push(LineEdit::Replace {
                    line: heading_idx,
                    text: rebuilt,
                });
            }
        }

        if current_stamps {
            match immediate_planning_line(lines, heading_idx) {
                // a stale stamp on the line being advanced is stripped in place
                Some(pidx) if pidx == line_idx => advanced = strip_closed_fragments(&advanced),
                _ => edits.extend(remove_closed_below(lines, heading_idx)),
            }
        }
        if advanced != lines[line_idx] {
            edits.push(LineEdit::Replace {
                line: line_idx,
                text: advanced,
            });
        }
        // the completion still clears any forwarded duplicate
        if let Some(cleanup) =
            compute_forward_cleanup_edits(lines, heading_idx, registry, formats, extra_glyphs)
        {
            edits.extend(cleanup);
        }

        Some(TransitionOutcome {
            edits,
            landed: initial.keyword.clone(),
            requested: target_keyword.to_string(),
            repeated: true,
        })
    }

    /// The SCHEDULED token carrying a repeater, on the planning line below the
    /// heading or inline on the heading itself.
    fn scheduled_repeater_site(
        lines: &[String],
        heading_idx: usize,
        formats: &[DateFormat],
    ) -> Option<(usize, PlanningToken, Timestamp)> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(pidx) = immediate_planning_line(lines, heading_idx) {
            candidates.push(pidx);
        }
        candidates.push(heading_idx);
        for idx in candidates {
            for token in planning_tokens(&lines[idx]) {
                if token.kind != PlanningKind::Scheduled {
                    continue;
                }
                let value = &lines[idx][token.value_start..token.value_end];
                if let Some((ts, _)) = parse_timestamp(value, formats) {
                    if ts.repeater.is_some() {
                        return Some((idx, token, ts));
                    }
                }
            }
        }
        None
    }

    fn closed_token_below(
        lines: &[String],
        heading_idx: usize,
    ) -> Option<(usize, PlanningToken)> {
        let pidx = immediate_planning_line(lines, heading_idx)?;
        planning_tokens(&lines[pidx])
            .into_iter()
            .find(|t| t.kind == PlanningKind::Closed)
            .map(|t| (pidx, t))
    }

    /// Drop the CLOSED stamp below a heading: the whole line when the stamp is
    /// all it holds, otherwise just the fragment.
    fn remove_closed_below(lines: &[String], heading_idx: usize) -> Vec<LineEdit> {
        let Some(pidx) = immediate_planning_line(lines, heading_idx) else {
            return Vec::new();
        };
        let tokens = planning_tokens(&lines[pidx]);
        if tokens.is_empty() || !tokens.iter().any(|t| t.kind == PlanningKind::Closed) {
            return Vec::new();
        }
        if tokens.iter().all(|t| t.kind == PlanningKind::Closed) {
            return vec![LineEdit::Delete {
                start: pidx,
                end: pidx + 1,
            }];
        }
        vec![LineEdit::Replace {
            line: pidx,
            text: strip_closed_fragments(&lines[pidx]),
        }]
    }

    fn strip_closed_fragments(line: &str) -> String {
        let closed: Vec<PlanningToken> = planning_tokens(line)
            .into_iter()
            .filter(|t| t.kind == PlanningKind::Closed)
            .collect();
        if closed.is_empty() {
            return line.to_string();
        }
        let indent_end = line.len() - line.trim_start_matches([' ', '\t']).len();
        let mut text = line.to_string();
        for token in closed.iter().rev() {
            let mut start = token.token_start;
            let mut end = token.value_end;
            if start == indent_end {
                // a leading token gives up the whitespace after it instead
                while end < line.len() && matches!(line.as_bytes()[end], b' ' | b'\t') {
                    end += 1;
                }
            } else {
                while start > indent_end && matches!(line.as_bytes()[start - 1], b' ' | b'\t') {
                    start -= 1;
                }
            }
            text.replace_range(start..end, "");
        }
        text.trim_end().to_string()
    }

    fn replace_token_value(line: &str, token: &PlanningToken, value: &str) -> String {
        let mut text = line.to_string();
        if token.value_start == token.value_end
            && !line[..token.value_start].ends_with([' ', '\t'])
        {
            text.replace_range(token.value_start..token.value_end, &format!(" {value}"));
        } else {
            text.replace_range(token.value_start..token.value_end, value);
        }
        text
    }

    fn closed_stamp(now: NaiveDateTime, format: DateFormat) -> String {
        let ts = Timestamp {
            date: now.date(),
            has_weekday: true,
            time: Some(now.time()),
            repeater: None,
        };
        format!("[{}]", ts.render(format))
    }

}

pub mod config {
    //! Caller-facing configuration with a soft-failing resolve boundary: a
    //! missing, partial, or malformed config still yields a usable engine,
    //! plus an error list the caller may surface.

    use crate::checkbox::CookieMode;
    use crate::dates::{accepted_date_formats, DateFormat};
    use crate::workflow::{
        validate_and_normalize_workflow_states, StateConfigError, WorkflowRegistry,
    };
    use serde::{Deserialize, Serialize};

    /// Deserialized caller configuration; keys match the original settings
    /// object and every field is optional.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct EngineConfig {
        /// Primary date layout token, like `"YYYY-MM-DD"`.
        pub date_format: Option<String>,
        /// Arbitrary JSON routed through workflow-state validation.
        pub workflow_states: Option<serde_json::Value>,
        pub cookie_mode: Option<CookieMode>,
    }

    /// Problems found while resolving a config. All are survivable; each maps
    /// to a fallback already applied.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum ConfigError {
        #[error("unknown date format token {0:?}, using YYYY-MM-DD")]
        UnknownDateFormat(String),
        #[error(transparent)]
        State(#[from] StateConfigError),
    }

    /// A resolved, always-usable engine configuration.
    #[derive(Debug, Clone)]
    pub struct EngineSettings {
        pub registry: WorkflowRegistry,
        pub date_format: DateFormat,
        /// Accepted parse layouts, primary first.
        pub formats: Vec<DateFormat>,
        pub cookie_mode: CookieMode,
        pub errors: Vec<ConfigError>,
    }

    impl Default for EngineSettings {
        fn default() -> Self {
            EngineConfig::default().resolve()
        }
    }

    impl EngineConfig {
        /// Resolve with soft fallbacks: an unknown layout token or an invalid
        /// state list degrades to the default, recorded in `errors`.
        pub fn resolve(&self) -> EngineSettings {
            let mut errors = Vec::new();
            let date_format = match &self.date_format {
                Some(token) => DateFormat::from_token(token).unwrap_or_else(|| {
                    errors.push(ConfigError::UnknownDateFormat(token.clone()));
                    DateFormat::YearMonthDay
                }),
                None => DateFormat::YearMonthDay,
            };
            let registry = match &self.workflow_states {
                Some(value) => {
                    let outcome = validate_and_normalize_workflow_states(value);
                    errors.extend(outcome.errors.into_iter().map(ConfigError::from));
                    WorkflowRegistry::new(outcome.value)
                }
                None => WorkflowRegistry::default_registry(),
            };
            EngineSettings {
                registry,
                formats: accepted_date_formats(date_format),
                date_format,
                cookie_mode: self.cookie_mode.unwrap_or_default(),
                errors,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn an_absent_config_resolves_to_defaults() {
            let settings = EngineConfig::default().resolve();
            assert!(settings.errors.is_empty());
            assert_eq!(settings.date_format, DateFormat::YearMonthDay);
            assert_eq!(settings.cookie_mode, CookieMode::Fraction);
            assert_eq!(settings.registry.cycle_keywords().len(), 5);
            assert_eq!(settings.formats[0], DateFormat::YearMonthDay);
        }

        #[test]
        fn unknown_tokens_fall_back_with_an_error() {
            let config = EngineConfig {
                date_format: Some("YYYY/MM/DD".to_string()),
                ..EngineConfig::default()
            };
            let settings = config.resolve();
            assert_eq!(settings.date_format, DateFormat::YearMonthDay);
            assert_eq!(settings.errors.len(), 1);
        }

        #[test]
        fn custom_states_replace_the_cycle() {
            let config: EngineConfig = serde_json::from_value(json!({
                "dateFormat": "DD-MM-YYYY",
                "cookieMode": "percent",
                "workflowStates": [
                    {"keyword": "open", "marker": "o"},
                    {"keyword": "shut", "isDoneLike": true, "stampsClosed": true}
                ]
            }))
            .expect("valid config json");
            let settings = config.resolve();
            assert!(settings.errors.is_empty());
            assert_eq!(settings.date_format, DateFormat::DayMonthYear);
            assert_eq!(settings.cookie_mode, CookieMode::Percent);
            assert_eq!(settings.registry.cycle_keywords(), vec!["OPEN", "SHUT"]);
            assert!(settings.registry.stamps_closed("shut"));
            // the primary layout leads the accepted list
            assert_eq!(settings.formats[0], DateFormat::DayMonthYear);
        }

        #[test]
        fn unusable_state_lists_keep_the_engine_alive() {
            let config = EngineConfig {
                workflow_states: Some(json!("not a list")),
                ..EngineConfig::default()
            };
            let settings = config.resolve();
            assert_eq!(settings.registry.cycle_keywords().len(), 5);
            assert!(settings
                .errors
                .iter()
                .any(|e| matches!(e, ConfigError::State(StateConfigError::NotASequence))));
        }
    }
}

pub use checkbox::{CheckboxState, CheckboxStats, CookieMode};
pub use config::{EngineConfig, EngineSettings};
pub use dates::DateFormat;
pub use edit::{LineEdit, Replacement};
pub use workflow::{CycleDirection, WorkflowRegistry};
