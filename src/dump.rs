//! Debug dump of decoded kernel tables.

use std::fmt::Write;

use crate::table::MetricValue;

/// Decoded rows of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDump {
    pub name: String,
    pub values: Vec<MetricValue>,
}

/// Every table referenced by one program's metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramTables {
    pub program: String,
    pub tables: Vec<TableDump>,
}

/// Renders the dump as plain text: a `## Program:` heading per program, a
/// `### Table:` heading per table and the table rows inside a fenced block,
/// one `<raw key> ([<labels>]) -> <value>` line per row.
pub fn render(programs: &[ProgramTables]) -> String {
    let mut out = String::new();

    for program in programs {
        let _ = writeln!(out, "## Program: {}\n", program.program);

        for table in &program.tables {
            let _ = writeln!(out, "### Table: {}\n", table.name);
            out.push_str("```\n");
            for value in &table.values {
                let _ = writeln!(
                    out,
                    "{} ([{}]) -> {:.6}",
                    value.raw,
                    value.labels.join(" "),
                    value.value
                );
            }
            out.push_str("```\n\n");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_format() {
        let dump = vec![ProgramTables {
            program: "bio".into(),
            tables: vec![TableDump {
                name: "counts".into(),
                values: vec![
                    MetricValue {
                        raw: "{ 0x800000 0x1 }".into(),
                        labels: vec!["sda".into(), "read".into()],
                        value: 10.0,
                    },
                    MetricValue {
                        raw: "{ 0x800000 0x2 }".into(),
                        labels: vec!["sda".into(), "write".into()],
                        value: 2.5,
                    },
                ],
            }],
        }];

        assert_eq!(
            render(&dump),
            "## Program: bio\n\n\
             ### Table: counts\n\n\
             ```\n\
             { 0x800000 0x1 } ([sda read]) -> 10.000000\n\
             { 0x800000 0x2 } ([sda write]) -> 2.500000\n\
             ```\n\n"
        );
    }

    #[test]
    fn test_program_without_tables() {
        let dump = vec![ProgramTables {
            program: "idle".into(),
            tables: Vec::new(),
        }];
        assert_eq!(render(&dump), "## Program: idle\n\n");
    }
}
