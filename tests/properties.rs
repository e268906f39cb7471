use proptest::prelude::*;
use samex::{edit_text, resolve_address, CollectDiagnostics, Range, Session, ShellProcess, Workspace};

// Text over a small alphabet so patterns match often; `é` keeps rune and
// byte offsets apart.
fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("".to_string()),
        "[abé,]{0,20}",
        "[abé, \n]{0,60}",
        "([ab]{0,3}\n){0,6}",
    ]
}

fn lines_strategy() -> impl Strategy<Value = String> {
    "([a-zé ]{0,6}\n){1,8}"
}

// Patterns that never match the empty string.
fn pattern_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("a"),
        Just("b+"),
        Just("[ab]"),
        Just("é"),
        Just(","),
        Just("\\n"),
        Just("a[^\\n]*"),
    ]
}

/// Ranges printed by `=#`, one `#q0` or `#q0,#q1` per line.
fn parse_ranges(output: &str) -> Vec<Range> {
    output
        .lines()
        .map(|l| {
            let mut parts = l.split(',').map(|p| p.trim_start_matches('#').parse::<usize>().unwrap());
            let q0 = parts.next().unwrap();
            let q1 = parts.next().unwrap_or(q0);
            Range::new(q0, q1)
        })
        .collect()
}

fn covers(mut ranges: Vec<Range>, len: usize) -> bool {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| (r.q0, r.q1));
    let mut at = 0;
    for r in ranges {
        if r.q0 != at {
            return false;
        }
        at = r.q1;
    }
    at == len
}

proptest! {
    #[test]
    fn x_and_y_partition_the_text(text in text_strategy(), re in pattern_strategy()) {
        let len = text.chars().count();
        let xs = edit_text(&text, &format!(",x/{re}/=#")).unwrap();
        let ys = edit_text(&text, &format!(",y/{re}/=#")).unwrap();
        prop_assert!(!xs.changed && !ys.changed);

        let mut all = parse_ranges(&xs.output);
        prop_assert!(all.iter().all(|r| !r.is_empty()));
        all.extend(parse_ranges(&ys.output));
        prop_assert!(covers(all, len), "x: {:?} y: {:?}", xs.output, ys.output);
    }

    #[test]
    fn x_without_pattern_visits_every_line(text in lines_strategy()) {
        let len = text.chars().count();
        let res = edit_text(&text, ",x =#").unwrap();
        let ranges = parse_ranges(&res.output);
        prop_assert_eq!(ranges.len(), text.lines().count());
        prop_assert!(covers(ranges, len));
    }

    #[test]
    fn line_addresses_select_lines(text in lines_strategy()) {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        for (i, line) in lines.iter().enumerate() {
            let n = i + 1;
            let r = resolve_address(&text, &n.to_string(), Range::point(0)).unwrap();
            let selected: String = text.chars().skip(r.q0).take(r.len()).collect();
            prop_assert_eq!(selected.as_str(), *line);

            // The command language agrees with the address evaluator.
            let res = edit_text(&text, &n.to_string()).unwrap();
            prop_assert_eq!(res.dot, r);
        }
    }

    #[test]
    fn undo_restores_text(text in text_strategy()) {
        let mut ws = Workspace::new();
        let id = ws.open("", &text);
        let mut session = Session::new();
        let mut diag = CollectDiagnostics::new();
        let mut process = ShellProcess::default();

        session.run(&mut ws, ",x/[ab]+/c/Z/", &mut diag, &mut process).unwrap();
        session.run(&mut ws, "u", &mut diag, &mut process).unwrap();
        prop_assert_eq!(ws.buffer(id).unwrap().text(), text);
    }
}
