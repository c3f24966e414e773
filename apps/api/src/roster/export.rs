use crate::models::CrewMember;

pub const CSV_HEADER: &str = "Name,Rank,Planet,Email,Age,Active";
pub const CSV_FILENAME: &str = "crew_data.csv";

/// Renders records as CSV in the order given. Cells are quoted per RFC 4180
/// when they contain a comma, quote or line break; unset values are empty.
pub fn render_csv(records: &[CrewMember]) -> String {
    let mut csv = String::from(CSV_HEADER);
    for member in records {
        let cells = [
            escape(&member.name),
            escape(member.rank.as_deref().unwrap_or_default()),
            escape(member.planet.as_deref().unwrap_or_default()),
            escape(&member.email),
            member.age.to_string(),
            member.active.map(|a| a.to_string()).unwrap_or_default(),
        ];
        csv.push('\n');
        csv.push_str(&cells.join(","));
    }
    csv
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn member(name: &str, rank: Option<&str>, active: Option<bool>) -> CrewMember {
        CrewMember {
            id: Uuid::new_v4(),
            name: name.to_string(),
            age: 35,
            planet: Some("Earth".to_string()),
            email: "k@x.com".to_string(),
            rank: rank.map(str::to_string),
            active,
            minor: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_header_only_when_empty() {
        assert_eq!(render_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn test_row_in_header_order() {
        let csv = render_csv(&[member("Kirk", Some("Captain"), Some(true))]);
        assert_eq!(csv, format!("{CSV_HEADER}\nKirk,Captain,Earth,k@x.com,35,true"));
    }

    #[test]
    fn test_unset_values_are_empty_cells() {
        let csv = render_csv(&[member("Worf", None, None)]);
        assert_eq!(csv.lines().nth(1), Some("Worf,,Earth,k@x.com,35,"));
    }

    #[test]
    fn test_escapes_commas_and_quotes() {
        let csv = render_csv(&[member("Kirk, James \"Jim\" T.", Some("Captain"), Some(false))]);
        assert_eq!(
            csv.lines().nth(1),
            Some("\"Kirk, James \"\"Jim\"\" T.\",Captain,Earth,k@x.com,35,false")
        );
    }
}
