//! Querystring filter and sort DSL.
//!
//! Keys have the form `field[:operator]`. Reserved keys (`page`, `per_page`, `sort`,
//! `fields`, `include`) are never filters. Parsing is tolerant about operators: an
//! unknown operator is only rejected when the filter is evaluated against storage.

use crate::error::AppError;
use std::fmt;
use std::str::FromStr;

pub const RESERVED: &[&str] = &["page", "per_page", "sort", "fields", "include"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    IsNull,
    IsNotNull,
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    Like,
    ILike,
    In,
    NotIn,
    Has,
    Any,
}

/// Number of arguments an operator takes besides the field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Nullary,
    Unary,
    /// Value plus a nested field name on the associated entity.
    Relationship,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::In => "in",
            Operator::NotIn => "nin",
            Operator::Has => "has",
            Operator::Any => "any",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::IsNull | Operator::IsNotNull => Arity::Nullary,
            Operator::Has | Operator::Any => Arity::Relationship,
            _ => Arity::Unary,
        }
    }

    /// Operators whose argument is a text pattern rather than a column-typed value.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Like | Operator::ILike
        )
    }
}

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "lte" => Operator::Lte,
            "contains" => Operator::Contains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "in" => Operator::In,
            "nin" => Operator::NotIn,
            "has" => Operator::Has,
            "any" => Operator::Any,
            other => return Err(AppError::UnknownOperator(other.to_string())),
        })
    }
}

/// A parsed predicate. `other` is the nested field name for `has`/`any`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub operator: String,
    pub argument: Option<String>,
    pub other: Option<String>,
}

impl Filter {
    pub fn new(name: &str, operator: &str, argument: Option<&str>) -> Self {
        Filter {
            name: name.to_string(),
            operator: operator.to_string(),
            argument: argument.map(str::to_string),
            other: None,
        }
    }

    /// Strict operator lookup; fails with `UnknownOperator`.
    pub fn operator(&self) -> Result<Operator, AppError> {
        self.operator.parse()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Filter(\"{}\", \"{}\", \"{}\")",
            self.name,
            self.operator,
            self.argument.as_deref().unwrap_or("")
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Unknown tokens fall back to ascending.
    pub fn parse(token: &str) -> Self {
        match token {
            "desc" => Direction::Desc,
            _ => Direction::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub direction: Direction,
    pub field: String,
}

/// One querystring pair after parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Where(Filter),
    Sort(Sort),
    Page(u64),
    PerPage(u64),
    Fields(Vec<String>),
    Include(Vec<String>),
}

/// Everything a read route gets from the querystring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub filters: Vec<Filter>,
    pub sort: Vec<Sort>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub fields: Vec<String>,
    pub include: Vec<String>,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Page numbers end up in LIMIT/OFFSET, which Postgres takes as `bigint`.
fn parse_number(key: &str, value: &str) -> Result<u64, AppError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| i64::try_from(*n).is_ok())
        .ok_or_else(|| AppError::InvalidQuery(format!("'{}' must be a non-negative integer, got '{}'", key, value)))
}

/// Parse one `key=value` pair. The key is split on its last `:`; the operator defaults to `eq`.
pub fn parse_param(key: &str, value: &str) -> Result<Param, AppError> {
    let (name, op) = match key.rsplit_once(':') {
        Some((name, op)) => (name, op),
        None => (key, "eq"),
    };
    Ok(match name {
        "sort" => Param::Sort(Sort {
            direction: Direction::parse(op),
            field: value.to_string(),
        }),
        "page" => Param::Page(parse_number(name, value)?),
        "per_page" => Param::PerPage(parse_number(name, value)?),
        "fields" => Param::Fields(split_list(value)),
        "include" => Param::Include(split_list(value)),
        _ => {
            let mut filter = Filter::new(name, op, Some(value));
            if matches!(op, "has" | "any") {
                if let Some((relation, nested)) = name.split_once('.') {
                    filter.name = relation.to_string();
                    filter.other = Some(nested.to_string());
                }
            }
            Param::Where(filter)
        }
    })
}

/// Parse all querystring pairs. Filters and sorts accumulate in order; the first `page`/`per_page` wins.
pub fn parse_querystring<I, K, V>(pairs: I) -> Result<QueryParams, AppError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut params = QueryParams::default();
    for (k, v) in pairs {
        match parse_param(k.as_ref(), v.as_ref())? {
            Param::Where(f) => params.filters.push(f),
            Param::Sort(s) => params.sort.push(s),
            Param::Page(n) => {
                params.page.get_or_insert(n);
            }
            Param::PerPage(n) => {
                params.per_page.get_or_insert(n);
            }
            Param::Fields(f) => params.fields.extend(f),
            Param::Include(i) => params.include.extend(i),
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_with_operator() {
        let p = parse_param("age:gt", "30").unwrap();
        assert_eq!(p, Param::Where(Filter::new("age", "gt", Some("30"))));
    }

    #[test]
    fn filter_defaults_to_eq() {
        let p = parse_param("name", "Banco X").unwrap();
        assert_eq!(p, Param::Where(Filter::new("name", "eq", Some("Banco X"))));
    }

    #[test]
    fn sort_directions() {
        let desc = parse_param("sort:desc", "name").unwrap();
        assert_eq!(
            desc,
            Param::Sort(Sort {
                direction: Direction::Desc,
                field: "name".into()
            })
        );
        let bogus = parse_param("sort:bogus", "name").unwrap();
        assert_eq!(
            bogus,
            Param::Sort(Sort {
                direction: Direction::Asc,
                field: "name".into()
            })
        );
        let plain = parse_param("sort", "id").unwrap();
        assert!(matches!(plain, Param::Sort(Sort { direction: Direction::Asc, .. })));
    }

    #[test]
    fn unknown_operator_parses_but_fails_on_evaluation() {
        let p = parse_param("age:blah", "30").unwrap();
        let Param::Where(filter) = p else {
            panic!("expected a filter");
        };
        assert!(matches!(filter.operator(), Err(AppError::UnknownOperator(op)) if op == "blah"));
    }

    #[test]
    fn page_must_be_numeric() {
        assert_eq!(parse_param("page", "2").unwrap(), Param::Page(2));
        assert!(matches!(parse_param("per_page", "ten"), Err(AppError::InvalidQuery(_))));
        assert!(matches!(
            parse_param("page", "9223372036854775808"),
            Err(AppError::InvalidQuery(_))
        ));
        assert_eq!(
            parse_param("per_page", "9223372036854775807").unwrap(),
            Param::PerPage(i64::MAX as u64)
        );
    }

    #[test]
    fn relationship_filter_takes_nested_field() {
        let p = parse_param("bank.name:has", "Galicia").unwrap();
        let Param::Where(filter) = p else {
            panic!("expected a filter");
        };
        assert_eq!(filter.name, "bank");
        assert_eq!(filter.other.as_deref(), Some("name"));
        assert_eq!(filter.operator().unwrap(), Operator::Has);
    }

    #[test]
    fn repeated_filters_accumulate() {
        let q = parse_querystring(vec![
            ("id:gt", "1"),
            ("id:lt", "9"),
            ("sort:desc", "name"),
            ("sort", "id"),
            ("page", "2"),
            ("page", "5"),
            ("fields", "id,name"),
        ])
        .unwrap();
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[1], Filter::new("id", "lt", Some("9")));
        assert_eq!(q.sort.len(), 2);
        assert_eq!(q.page, Some(2));
        assert_eq!(q.fields, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn empty_querystring_has_no_filters() {
        let q = parse_querystring(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(q, QueryParams::default());
    }
}
