// 👤 Person Entity - one listed individual, decoded from a raw record
//
// Immutable once built: the division is resolved exactly once, at
// construction, from the first six characters of the identifier.

use crate::division::{CodeTable, Division, DivisionResolver, CODE_LEN};
use crate::error::DecodeError;
use crate::fetcher::RawRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// RAW FIELD MAPPING
// ============================================================================

/// Source-specific short keys of a raw record
pub mod fields {
    /// 姓名 - name
    pub const NAME: &str = "xm";
    /// 发布日期 - listing date
    pub const LISTED_DATE: &str = "fbrq";
    /// 身份证号 - identifier code
    pub const ID_CODE: &str = "sfzh";
    /// 执行法院 - issuing court
    pub const DEPARTMENT: &str = "zxfy";
}

/// Date format of the listing date
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn string_field(raw: &RawRecord, key: &'static str) -> Result<String, DecodeError> {
    match raw.get(key) {
        None | Some(serde_json::Value::Null) => Err(DecodeError::MissingField(key)),
        Some(value) => value
            .as_str()
            .map(|s| s.to_string())
            .ok_or(DecodeError::NotAString(key)),
    }
}

// ============================================================================
// PERSON
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// As returned by the source, redaction characters included
    pub name: String,
    pub listed_date: NaiveDate,
    /// National identifier; checksum is never validated
    pub id_code: String,
    /// Issuing authority, opaque
    pub department: String,
    /// `None` when no revision of the code table knows the prefix
    pub division: Option<Division>,
}

impl Person {
    /// Decode a raw record and resolve its division.
    ///
    /// # Errors
    /// * `MissingField` / `NotAString` - one of the four keys is absent or not text
    /// * `InvalidDate` - listing date is not `YYYY-MM-DD`
    /// * `ShortIdCode` - identifier has fewer than six characters
    /// * `Division` - prefix is not six digits
    pub fn from_raw<C: CodeTable>(
        raw: &RawRecord,
        resolver: &DivisionResolver<C>,
    ) -> Result<Self, DecodeError> {
        let name = string_field(raw, fields::NAME)?;
        let date_str = string_field(raw, fields::LISTED_DATE)?;
        let id_code = string_field(raw, fields::ID_CODE)?;
        let department = string_field(raw, fields::DEPARTMENT)?;

        let listed_date = NaiveDate::parse_from_str(date_str.trim(), DATE_FORMAT).map_err(
            |source| DecodeError::InvalidDate {
                value: date_str.clone(),
                source,
            },
        )?;

        let prefix = geo_prefix(&id_code).ok_or_else(|| DecodeError::ShortIdCode(id_code.clone()))?;
        let division = resolver.resolve(prefix)?;

        Ok(Person {
            name,
            listed_date,
            id_code,
            department,
            division,
        })
    }

    /// First six characters of the identifier
    pub fn geo_prefix(&self) -> &str {
        geo_prefix(&self.id_code).unwrap_or(&self.id_code)
    }

    /// Hash of the identifying fields, used to skip re-harvested rows
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            self.name, self.listed_date, self.id_code, self.department
        ));
        format!("{:x}", hasher.finalize())
    }
}

fn geo_prefix(id_code: &str) -> Option<&str> {
    let end = id_code.char_indices().nth(CODE_LEN).map_or(id_code.len(), |(i, _)| i);
    let prefix = &id_code[..end];
    (prefix.chars().count() == CODE_LEN).then_some(prefix)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::division::tests::sample_table;
    use crate::division::DivisionTable;
    use crate::error::DivisionError;

    fn raw(name: &str, date: &str, id: &str, dept: &str) -> RawRecord {
        serde_json::json!({
            (fields::NAME): name,
            (fields::LISTED_DATE): date,
            (fields::ID_CODE): id,
            (fields::DEPARTMENT): dept,
        })
    }

    #[test]
    fn test_round_trip_fields() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("王**", "2019-07-15", "110101********1234", "北京市东城区人民法院");

        let person = Person::from_raw(&record, &resolver).unwrap();

        assert_eq!(person.name, "王**");
        assert_eq!(person.listed_date, NaiveDate::from_ymd_opt(2019, 7, 15).unwrap());
        assert_eq!(person.id_code, "110101********1234");
        assert_eq!(person.department, "北京市东城区人民法院");
        assert_eq!(person.geo_prefix(), "110101");
        assert_eq!(person.division.unwrap().province, "北京市");
    }

    #[test]
    fn test_historical_division_attached() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("李*", "2016-01-04", "320811********0021", "淮安市清江浦区人民法院");

        let person = Person::from_raw(&record, &resolver).unwrap();

        let division = person.division.unwrap();
        assert_eq!(division.revision.as_deref(), Some("2018"));
    }

    #[test]
    fn test_unknown_prefix_gives_no_division() {
        let resolver = DivisionResolver::new(DivisionTable::new());
        let record = raw("赵*", "2020-12-31", "990000********0000", "某法院");

        let person = Person::from_raw(&record, &resolver).unwrap();

        assert!(person.division.is_none());
    }

    #[test]
    fn test_missing_field() {
        let resolver = DivisionResolver::new(sample_table());
        let record = serde_json::json!({
            (fields::NAME): "王**",
            (fields::LISTED_DATE): "2019-07-15",
            (fields::ID_CODE): "110101********1234",
        });

        let err = Person::from_raw(&record, &resolver).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField(fields::DEPARTMENT)));
    }

    #[test]
    fn test_non_object_record_is_missing_field() {
        let resolver = DivisionResolver::new(sample_table());
        let err = Person::from_raw(&serde_json::json!("not a record"), &resolver).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField(fields::NAME)));
    }

    #[test]
    fn test_non_string_field() {
        let resolver = DivisionResolver::new(sample_table());
        let mut record = raw("王**", "2019-07-15", "110101********1234", "法院");
        record[fields::LISTED_DATE] = serde_json::json!(20190715);

        let err = Person::from_raw(&record, &resolver).unwrap_err();
        assert!(matches!(err, DecodeError::NotAString(fields::LISTED_DATE)));
    }

    #[test]
    fn test_malformed_date() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("王**", "2019/07/15", "110101********1234", "法院");

        let err = Person::from_raw(&record, &resolver).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidDate { .. }));
    }

    #[test]
    fn test_short_id_code() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("王**", "2019-07-15", "1101", "法院");

        let err = Person::from_raw(&record, &resolver).unwrap_err();
        assert!(matches!(err, DecodeError::ShortIdCode(_)));
    }

    #[test]
    fn test_non_numeric_prefix() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("王**", "2019-07-15", "11**01********1234", "法院");

        let err = Person::from_raw(&record, &resolver).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Division(DivisionError::MalformedCode(_))
        ));
    }

    #[test]
    fn test_idempotency_hash_stable() {
        let resolver = DivisionResolver::new(sample_table());
        let record = raw("王**", "2019-07-15", "110101********1234", "法院");

        let a = Person::from_raw(&record, &resolver).unwrap();
        let b = Person::from_raw(&record, &resolver).unwrap();

        assert_eq!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        assert_eq!(a.compute_idempotency_hash().len(), 64);
    }
}
