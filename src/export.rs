// 📤 CSV Export - flat rows of stored persons

use crate::person::{Person, DATE_FORMAT};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Flat, column-stable shape of a person for CSV output
#[derive(Debug, Serialize)]
struct PersonRow<'a> {
    name: &'a str,
    listed_date: String,
    id_code: &'a str,
    department: &'a str,
    division_code: Option<&'a str>,
    province: Option<&'a str>,
    city: Option<&'a str>,
    county: Option<&'a str>,
    division_revision: Option<&'a str>,
}

impl<'a> From<&'a Person> for PersonRow<'a> {
    fn from(person: &'a Person) -> Self {
        let division = person.division.as_ref();
        PersonRow {
            name: &person.name,
            listed_date: person.listed_date.format(DATE_FORMAT).to_string(),
            id_code: &person.id_code,
            department: &person.department,
            division_code: division.map(|d| d.code.as_str()),
            province: division.map(|d| d.province.as_str()),
            city: division.and_then(|d| d.city.as_deref()),
            county: division.and_then(|d| d.county.as_deref()),
            division_revision: division.and_then(|d| d.revision.as_deref()),
        }
    }
}

/// Write persons as CSV (with header) to any writer
pub fn write_persons<W: Write>(writer: W, persons: &[Person]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);

    for person in persons {
        wtr.serialize(PersonRow::from(person))
            .with_context(|| format!("Failed to write person {}", person.id_code))?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(persons.len())
}

/// Write persons as CSV to a file
pub fn export_csv(path: &Path, persons: &[Person]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_persons(file, persons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::division::Division;
    use chrono::NaiveDate;

    fn person(division: Option<Division>) -> Person {
        Person {
            name: "王**".to_string(),
            listed_date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            id_code: "110101********1234".to_string(),
            department: "北京市东城区人民法院".to_string(),
            division,
        }
    }

    #[test]
    fn test_write_persons() {
        let persons = vec![
            person(Some(Division::new("110101", "北京市").with_city("市辖区").with_county("东城区"))),
            person(None),
        ];

        let mut out = Vec::new();
        let written = write_persons(&mut out, &persons).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(written, 2);
        assert_eq!(
            lines[0],
            "name,listed_date,id_code,department,division_code,province,city,county,division_revision"
        );
        assert_eq!(
            lines[1],
            "王**,2021-03-01,110101********1234,北京市东城区人民法院,110101,北京市,市辖区,东城区,"
        );
        assert_eq!(
            lines[2],
            "王**,2021-03-01,110101********1234,北京市东城区人民法院,,,,,"
        );
    }

    #[test]
    fn test_export_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persons.csv");

        let written = export_csv(&path, &[person(None)]).unwrap();

        assert_eq!(written, 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
