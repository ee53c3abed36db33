//! Regex-based SQL pattern extraction.
//!
//! Extracts the structural telemetry the rule generator and the LLM
//! context need from hand-written BI queries: tables, joins, CTEs,
//! aggregations, date-filter idioms, timezone shifts, exclusions, CASE
//! blocks, window functions and more. CTE bodies are delimited with a
//! balanced-paren scan; everything else is a regex battery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Structural classification of a query, by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStructure {
    SingleTable,
    MultiJoin,
    Cte,
    Union,
    CteUnion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    /// `from` or `join`.
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinInfo {
    /// The join keyword as written, e.g. `LEFT JOIN`, `JOIN`.
    pub join_type: String,
    pub table: String,
    pub alias: Option<String>,
    /// ON-clause conjuncts, split on AND.
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CteInfo {
    pub name: String,
    /// Tables referenced inside the CTE body.
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub function: String,
    pub argument: String,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateFilterInfo {
    pub column: String,
    /// `mtd_current`, `trailing_months`, `fixed_start` or
    /// `prior_year_mtd`.
    pub pattern: String,
    pub snippet: String,
    pub has_timezone: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimezoneConversion {
    pub column: String,
    pub interval: String,
    /// `330_minutes`, `5h30m` or `other`.
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    /// `not_in`, `not_equals` or `not_like`.
    pub kind: String,
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseBranch {
    pub when: String,
    pub then: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseBlock {
    pub branches: Vec<CaseBranch>,
    pub else_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowFunction {
    pub function: String,
    pub partition_by: Option<String>,
    pub order_by: Option<String>,
}

/// Everything the analyzer extracts from one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlAnalysis {
    pub tables: Vec<TableRef>,
    pub joins: Vec<JoinInfo>,
    pub ctes: Vec<CteInfo>,
    pub aggregations: Vec<Aggregation>,
    pub date_filters: Vec<DateFilterInfo>,
    pub timezone_conversions: Vec<TimezoneConversion>,
    pub progressive_filters: Vec<String>,
    pub exclusions: Vec<Exclusion>,
    pub case_blocks: Vec<CaseBlock>,
    pub status_conditions: Vec<String>,
    pub union_structure: bool,
    pub window_functions: Vec<WindowFunction>,
    pub jsonb_operations: Vec<String>,
    pub distinct_counts: Vec<String>,
    pub positional_params: Vec<String>,
    pub structure: QueryStructure,
}

/// Identifiers that can never be table names or aliases.
const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "where", "group", "order", "limit", "offset", "having", "union", "join",
    "left", "right", "inner", "outer", "cross", "full", "on", "as", "and", "or", "not", "in",
    "is", "null", "by", "case", "when", "then", "else", "end", "distinct", "interval", "extract",
    "set", "lateral", "using", "fetch", "with", "all", "between", "like", "ilike", "exists",
];

/// EXTRACT fields; a `FROM` preceded by one of these is not a table
/// reference.
const EXTRACT_FIELDS: &[&str] = &[
    "day", "month", "year", "epoch", "dow", "doy", "hour", "minute", "second", "week", "quarter",
];

fn is_keyword(word: &str) -> bool {
    SQL_KEYWORDS.contains(&word.to_lowercase().as_str())
}

static FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bFROM\s+([A-Za-z_][\w.]*)(?:\s+(?:AS\s+)?([A-Za-z_]\w*))?").unwrap()
});

static JOIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:((?:LEFT|RIGHT|FULL)(?:\s+OUTER)?|INNER|CROSS)\s+)?JOIN\s+([A-Za-z_][\w.]*)(?:\s+(?:AS\s+)?([A-Za-z_]\w*))?",
    )
    .unwrap()
});

static ON_START_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*ON\s+").unwrap());

static ON_TERMINATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:LEFT|RIGHT|FULL)(?:\s+OUTER)?\s+JOIN|INNER\s+JOIN|CROSS\s+JOIN|JOIN|WHERE|GROUP\s+BY|ORDER\s+BY|LIMIT|HAVING|UNION)\b|\)",
    )
    .unwrap()
});

static AND_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").unwrap());

static WITH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWITH\b").unwrap());

static CTE_HEAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([A-Za-z_]\w*)\s+AS\s*\(").unwrap());

static AGG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(\s*(DISTINCT\s+)?([^()]*(?:\([^()]*\)[^()]*)*)\)")
        .unwrap()
});

static DISTINCT_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCOUNT\s*\(\s*DISTINCT\s+([^()]+)\)").unwrap());

static TRAILING_MONTHS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([\w.]+)(\s*\+\s*interval\s*'[^']+')?\s*>=\s*date_trunc\('month',\s*CURRENT_DATE\)\s*-\s*interval\s*'(\d+)\s*months?'",
    )
    .unwrap()
});

static MTD_CURRENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([\w.]+)(\s*\+\s*interval\s*'[^']+')?\s*>=\s*date_trunc\('month',\s*CURRENT_DATE\)",
    )
    .unwrap()
});

static FIXED_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\w.]+)(\s*\+\s*interval\s*'[^']+')?\s*>=\s*'(\d{4}-\d{2}-\d{2})'").unwrap()
});

static PRIOR_YEAR_FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([\w.]+)(\s*\+\s*interval\s*'[^']+')?\s*>=\s*date_trunc\('month',\s*CURRENT_DATE\s*-\s*interval\s*'1\s*year'\)",
    )
    .unwrap()
});

static PRIOR_YEAR_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CURRENT_DATE\s*-\s*interval\s*'1\s*year'").unwrap());

static TZ_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\w.]+)\s*\+\s*interval\s*'([^']+)'").unwrap());

static PROGRESSIVE_EXTRACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)EXTRACT\s*\(\s*DAY\s+FROM\s+[^()]*(?:\([^()]*\)[^()]*)*\)\s*<=\s*EXTRACT\s*\(\s*DAY\s+FROM\s+[^()]*(?:\([^()]*\)[^()]*)*\)",
    )
    .unwrap()
});

static PROGRESSIVE_DATE_PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)date_part\('day',\s*[^)]*\)\s*<=\s*date_part\('day',\s*[^)]*\)").unwrap()
});

static NOT_IN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\w.]+)\s+NOT\s+IN\s*\(([^)]*)\)").unwrap());

static NOT_EQUALS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\w.]+)\s*(?:!=|<>)\s*'([^']*)'").unwrap());

static NOT_LIKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\w.]+)\s+NOT\s+I?LIKE\s+'([^']*)'").unwrap());

static QUOTED_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']*)'").unwrap());

static CASE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(CASE|WHEN|THEN|ELSE|END)\b").unwrap());

static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([\w.]*status[\w.]*)\s*(?:NOT\s+IN|IN|NOT\s+I?LIKE|I?LIKE|!=|<>|=)\s*(?:'[^']*'|\([^)]*\)|[\w.]+)",
    )
    .unwrap()
});

static UNION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bUNION\b").unwrap());

static WINDOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Za-z_]\w*)\s*\(([^()]*)\)\s+OVER\s*\(([^()]*)\)").unwrap()
});

static PARTITION_BY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)PARTITION\s+BY\s+(.+?)(?:\s+ORDER\s+BY|$)").unwrap()
});

static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ORDER\s+BY\s+(.+)$").unwrap());

static JSONB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w.]+\s*(?:->>|->|#>>|#>|@>)\s*(?:'[^']*'|\d+)").unwrap()
});

static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

/// Scan a balanced parenthesized block starting at `open` (which must
/// index a `(`). Parens inside single-quoted strings are ignored.
/// Returns the index of the closing paren and the inner content.
fn balanced_paren_block(s: &str, open: usize) -> Option<(usize, &str)> {
    let bytes = s.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth: i32 = 0;
    let mut in_string = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        let c = b as char;
        if in_string {
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match c {
            '\'' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((i, &s[open + 1..i]));
                }
            }
            _ => {}
        }
    }
    None
}

/// The word immediately preceding byte offset `at`, if any.
fn preceding_word(s: &str, at: usize) -> Option<&str> {
    let head = s[..at].trim_end();
    let word = head
        .rsplit(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or("");
    (!word.is_empty()).then_some(word)
}

fn clean_alias(alias: Option<&str>) -> Option<String> {
    alias
        .filter(|a| !is_keyword(a))
        .map(|a| a.to_string())
}

fn extract_from_tables(sql: &str) -> Vec<TableRef> {
    let mut out = Vec::new();
    for cap in FROM_RE.captures_iter(sql) {
        let whole = cap.get(0).unwrap();
        // `EXTRACT(DAY FROM x)` is not a table reference.
        if let Some(word) = preceding_word(sql, whole.start()) {
            if EXTRACT_FIELDS.contains(&word.to_lowercase().as_str()) {
                continue;
            }
        }
        let name = cap.get(1).unwrap().as_str();
        if is_keyword(name) {
            continue;
        }
        out.push(TableRef {
            name: name.to_string(),
            alias: clean_alias(cap.get(2).map(|m| m.as_str())),
            role: "from".to_string(),
        });
    }
    out
}

fn extract_joins(sql: &str) -> (Vec<TableRef>, Vec<JoinInfo>) {
    let mut tables = Vec::new();
    let mut joins = Vec::new();

    for cap in JOIN_RE.captures_iter(sql) {
        let name = cap.get(2).unwrap().as_str();
        if is_keyword(name) {
            continue;
        }
        let alias = clean_alias(cap.get(3).map(|m| m.as_str()));
        let join_type = match cap.get(1) {
            Some(kw) => format!("{} JOIN", kw.as_str().to_uppercase()),
            None => "JOIN".to_string(),
        };

        // The ON clause runs from just past the match to the next join
        // keyword or block terminator. A keyword swallowed by the alias
        // group (e.g. `JOIN t ON ...`) is given back first.
        let rest_start = match cap.get(3) {
            Some(m) if is_keyword(m.as_str()) => m.start(),
            _ => cap.get(0).unwrap().end(),
        };
        let rest = &sql[rest_start..];
        let conditions = match ON_START_RE.find(rest) {
            Some(on) => {
                let clause = &rest[on.end()..];
                let end = ON_TERMINATOR_RE
                    .find(clause)
                    .map(|t| t.start())
                    .unwrap_or(clause.len());
                AND_SPLIT_RE
                    .split(clause[..end].trim())
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            }
            None => Vec::new(),
        };

        tables.push(TableRef {
            name: name.to_string(),
            alias: alias.clone(),
            role: "join".to_string(),
        });
        joins.push(JoinInfo {
            join_type,
            table: name.to_string(),
            alias,
            conditions,
        });
    }

    (tables, joins)
}

fn extract_ctes(sql: &str) -> Vec<CteInfo> {
    let Some(with_kw) = WITH_RE.find(sql) else {
        return Vec::new();
    };

    let mut ctes = Vec::new();
    let mut pos = with_kw.end();
    while let Some(cap) = CTE_HEAD_RE.captures(&sql[pos..]) {
        let whole = cap.get(0).unwrap();
        let open = pos + whole.end() - 1;
        let Some((close, body)) = balanced_paren_block(sql, open) else {
            break;
        };
        let mut body_tables: Vec<String> = extract_from_tables(body)
            .into_iter()
            .map(|t| t.name)
            .collect();
        let (join_tables, _) = extract_joins(body);
        body_tables.extend(join_tables.into_iter().map(|t| t.name));
        body_tables.dedup();

        ctes.push(CteInfo {
            name: cap.get(1).unwrap().as_str().to_string(),
            tables: body_tables,
        });
        pos = close + 1;
    }
    ctes
}

fn bucket_interval(literal: &str) -> &'static str {
    let normalized = literal.to_lowercase();
    if normalized.contains("330") {
        "330_minutes"
    } else if normalized.replace(' ', "").contains("5h30m") {
        "5h30m"
    } else {
        "other"
    }
}

fn extract_date_filters(sql: &str) -> Vec<DateFilterInfo> {
    let mut out = Vec::new();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for cap in TRAILING_MONTHS_RE.captures_iter(sql) {
        let whole = cap.get(0).unwrap();
        claimed.push((whole.start(), whole.end()));
        out.push(DateFilterInfo {
            column: cap.get(1).unwrap().as_str().to_string(),
            pattern: "trailing_months".to_string(),
            snippet: whole.as_str().to_string(),
            has_timezone: cap.get(2).is_some(),
        });
    }

    for cap in PRIOR_YEAR_FULL_RE.captures_iter(sql) {
        let whole = cap.get(0).unwrap();
        claimed.push((whole.start(), whole.end()));
        out.push(DateFilterInfo {
            column: cap.get(1).unwrap().as_str().to_string(),
            pattern: "prior_year_mtd".to_string(),
            snippet: whole.as_str().to_string(),
            has_timezone: cap.get(2).is_some(),
        });
    }
    if out.iter().all(|f| f.pattern != "prior_year_mtd") {
        if let Some(m) = PRIOR_YEAR_BARE_RE.find(sql) {
            out.push(DateFilterInfo {
                column: String::new(),
                pattern: "prior_year_mtd".to_string(),
                snippet: m.as_str().to_string(),
                has_timezone: false,
            });
        }
    }

    for cap in MTD_CURRENT_RE.captures_iter(sql) {
        let whole = cap.get(0).unwrap();
        // Skip spans already claimed as trailing-months prefixes.
        if claimed
            .iter()
            .any(|&(s, e)| whole.start() >= s && whole.start() < e)
        {
            continue;
        }
        // A `- interval 'N months'` tail means this is a trailing
        // window, not a plain MTD bound.
        if sql[whole.end()..].trim_start().starts_with('-') {
            continue;
        }
        out.push(DateFilterInfo {
            column: cap.get(1).unwrap().as_str().to_string(),
            pattern: "mtd_current".to_string(),
            snippet: whole.as_str().to_string(),
            has_timezone: cap.get(2).is_some(),
        });
    }

    for cap in FIXED_START_RE.captures_iter(sql) {
        let whole = cap.get(0).unwrap();
        out.push(DateFilterInfo {
            column: cap.get(1).unwrap().as_str().to_string(),
            pattern: "fixed_start".to_string(),
            snippet: whole.as_str().to_string(),
            has_timezone: cap.get(2).is_some(),
        });
    }

    out
}

fn extract_exclusions(sql: &str) -> Vec<Exclusion> {
    let mut out = Vec::new();

    for cap in NOT_IN_RE.captures_iter(sql) {
        let values = QUOTED_VALUE_RE
            .captures_iter(cap.get(2).unwrap().as_str())
            .map(|v| v.get(1).unwrap().as_str().to_string())
            .collect::<Vec<_>>();
        if values.is_empty() {
            continue;
        }
        out.push(Exclusion {
            kind: "not_in".to_string(),
            column: cap.get(1).unwrap().as_str().to_string(),
            values,
        });
    }

    for cap in NOT_EQUALS_RE.captures_iter(sql) {
        out.push(Exclusion {
            kind: "not_equals".to_string(),
            column: cap.get(1).unwrap().as_str().to_string(),
            values: vec![cap.get(2).unwrap().as_str().to_string()],
        });
    }

    for cap in NOT_LIKE_RE.captures_iter(sql) {
        out.push(Exclusion {
            kind: "not_like".to_string(),
            column: cap.get(1).unwrap().as_str().to_string(),
            values: vec![cap.get(2).unwrap().as_str().to_string()],
        });
    }

    out
}

fn extract_case_blocks(sql: &str) -> Vec<CaseBlock> {
    let tokens: Vec<(usize, usize, String)> = CASE_TOKEN_RE
        .find_iter(sql)
        .map(|m| (m.start(), m.end(), m.as_str().to_uppercase()))
        .collect();

    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].2 == "CASE" {
            if let Some((block, next)) = parse_case_block(sql, &tokens, i) {
                if !block.branches.is_empty() {
                    out.push(block);
                }
                i = next;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Parse one CASE..END starting at token `start`, tracking depth so
/// nested CASEs stay inside their enclosing branch text. Returns the
/// block and the index of the first token past END.
fn parse_case_block(
    sql: &str,
    tokens: &[(usize, usize, String)],
    start: usize,
) -> Option<(CaseBlock, usize)> {
    let mut depth = 1;
    let mut branches = Vec::new();
    let mut else_value = None;
    let mut pending_when: Option<usize> = None;
    let mut pending_then: Option<(String, usize)> = None;
    let mut pending_else: Option<usize> = None;

    for (j, (tok_start, tok_end, token)) in tokens.iter().enumerate().skip(start + 1) {
        match token.as_str() {
            "CASE" => depth += 1,
            "END" => {
                depth -= 1;
                if depth == 0 {
                    if let Some((when, then_start)) = pending_then.take() {
                        branches.push(CaseBranch {
                            when,
                            then: sql[then_start..*tok_start].trim().to_string(),
                        });
                    }
                    if let Some(else_start) = pending_else.take() {
                        else_value = Some(sql[else_start..*tok_start].trim().to_string());
                    }
                    return Some((
                        CaseBlock {
                            branches,
                            else_value,
                        },
                        j + 1,
                    ));
                }
            }
            "WHEN" if depth == 1 => {
                if let Some((when, then_start)) = pending_then.take() {
                    branches.push(CaseBranch {
                        when,
                        then: sql[then_start..*tok_start].trim().to_string(),
                    });
                }
                pending_when = Some(*tok_end);
            }
            "THEN" if depth == 1 => {
                if let Some(when_start) = pending_when.take() {
                    pending_then = Some((sql[when_start..*tok_start].trim().to_string(), *tok_end));
                }
            }
            "ELSE" if depth == 1 => {
                if let Some((when, then_start)) = pending_then.take() {
                    branches.push(CaseBranch {
                        when,
                        then: sql[then_start..*tok_start].trim().to_string(),
                    });
                }
                pending_else = Some(*tok_end);
            }
            _ => {}
        }
    }
    None
}

fn extract_window_functions(sql: &str) -> Vec<WindowFunction> {
    WINDOW_RE
        .captures_iter(sql)
        .map(|cap| {
            let spec = cap.get(3).unwrap().as_str();
            WindowFunction {
                function: cap.get(1).unwrap().as_str().to_uppercase(),
                partition_by: PARTITION_BY_RE
                    .captures(spec)
                    .map(|c| c.get(1).unwrap().as_str().trim().to_string()),
                order_by: ORDER_BY_RE
                    .captures(spec)
                    .map(|c| c.get(1).unwrap().as_str().trim().to_string()),
            }
        })
        .collect()
}

/// Analyze one SQL query.
pub fn analyze_query(sql: &str) -> SqlAnalysis {
    let mut tables = extract_from_tables(sql);
    let (join_tables, joins) = extract_joins(sql);
    tables.extend(join_tables);
    tables.dedup();

    let ctes = extract_ctes(sql);
    let union_structure = UNION_RE.is_match(sql);

    let aggregations = AGG_RE
        .captures_iter(sql)
        .map(|cap| Aggregation {
            function: cap.get(1).unwrap().as_str().to_uppercase(),
            argument: cap.get(3).unwrap().as_str().trim().to_string(),
            distinct: cap.get(2).is_some(),
        })
        .collect();

    let distinct_counts = DISTINCT_COUNT_RE
        .captures_iter(sql)
        .map(|cap| cap.get(1).unwrap().as_str().trim().to_string())
        .collect();

    let timezone_conversions = TZ_RE
        .captures_iter(sql)
        .map(|cap| {
            let interval = cap.get(2).unwrap().as_str().to_string();
            TimezoneConversion {
                column: cap.get(1).unwrap().as_str().to_string(),
                bucket: bucket_interval(&interval).to_string(),
                interval,
            }
        })
        .collect();

    let mut progressive_filters: Vec<String> = PROGRESSIVE_EXTRACT_RE
        .find_iter(sql)
        .map(|m| m.as_str().to_string())
        .collect();
    progressive_filters.extend(
        PROGRESSIVE_DATE_PART_RE
            .find_iter(sql)
            .map(|m| m.as_str().to_string()),
    );

    let status_conditions = STATUS_RE
        .find_iter(sql)
        .map(|m| m.as_str().to_string())
        .collect();

    let jsonb_operations = JSONB_RE
        .find_iter(sql)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut params: Vec<u32> = PARAM_RE
        .captures_iter(sql)
        .filter_map(|c| c.get(1).unwrap().as_str().parse().ok())
        .collect();
    params.sort_unstable();
    params.dedup();
    let positional_params = params.into_iter().map(|n| format!("${n}")).collect();

    let structure = match (!ctes.is_empty(), union_structure, !joins.is_empty()) {
        (true, true, _) => QueryStructure::CteUnion,
        (true, false, _) => QueryStructure::Cte,
        (false, true, _) => QueryStructure::Union,
        (false, false, true) => QueryStructure::MultiJoin,
        (false, false, false) => QueryStructure::SingleTable,
    };

    SqlAnalysis {
        tables,
        joins,
        ctes,
        aggregations,
        date_filters: extract_date_filters(sql),
        timezone_conversions,
        progressive_filters,
        exclusions: extract_exclusions(sql),
        case_blocks: extract_case_blocks(sql),
        status_conditions,
        union_structure,
        window_functions: extract_window_functions(sql),
        jsonb_operations,
        distinct_counts,
        positional_params,
        structure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RulesCatalog;

    #[test]
    fn cte_union_structure_and_cte_list() {
        let a = analyze_query("WITH a AS (SELECT 1) SELECT * FROM a UNION SELECT * FROM b");
        assert_eq!(a.structure, QueryStructure::CteUnion);
        assert!(a.union_structure);
        assert_eq!(a.ctes.len(), 1);
        assert_eq!(a.ctes[0].name, "a");
        assert!(a.ctes[0].tables.is_empty());
    }

    #[test]
    fn single_table_with_mtd_filter() {
        let a = analyze_query(
            "SELECT COUNT(DISTINCT l.id) AS lead_count
             FROM leads l
             WHERE l.created_at + interval '330 minutes' >= date_trunc('month', CURRENT_DATE)
               AND l.source NOT IN ('test', 'internal')",
        );

        assert_eq!(a.structure, QueryStructure::SingleTable);
        assert_eq!(a.tables.len(), 1);
        assert_eq!(a.tables[0].name, "leads");
        assert_eq!(a.tables[0].alias.as_deref(), Some("l"));

        assert_eq!(a.date_filters.len(), 1);
        let df = &a.date_filters[0];
        assert_eq!(df.pattern, "mtd_current");
        assert_eq!(df.column, "l.created_at");
        assert!(df.has_timezone);

        assert_eq!(a.timezone_conversions.len(), 1);
        assert_eq!(a.timezone_conversions[0].bucket, "330_minutes");

        assert_eq!(a.exclusions.len(), 1);
        assert_eq!(a.exclusions[0].kind, "not_in");
        assert_eq!(a.exclusions[0].column, "l.source");
        assert_eq!(a.exclusions[0].values, vec!["test", "internal"]);

        assert_eq!(a.distinct_counts, vec!["l.id"]);
        assert_eq!(a.aggregations.len(), 1);
        assert!(a.aggregations[0].distinct);
    }

    #[test]
    fn trailing_months_is_not_double_counted_as_mtd() {
        let a = analyze_query(
            "SELECT 1 FROM leads l
             WHERE l.created_at + interval '330 minutes' >= date_trunc('month', CURRENT_DATE) - interval '12 months'",
        );
        assert_eq!(a.date_filters.len(), 1);
        assert_eq!(a.date_filters[0].pattern, "trailing_months");
        assert!(a.date_filters[0].has_timezone);
    }

    #[test]
    fn fixed_start_filter() {
        let a = analyze_query("SELECT 1 FROM leads WHERE created_at >= '2024-01-01'");
        assert_eq!(a.date_filters.len(), 1);
        assert_eq!(a.date_filters[0].pattern, "fixed_start");
        assert_eq!(a.date_filters[0].column, "created_at");
        assert!(!a.date_filters[0].has_timezone);
    }

    #[test]
    fn joins_with_on_conditions_split_on_and() {
        let a = analyze_query(
            "SELECT * FROM leads l
             LEFT JOIN prospects p ON p.lead_id = l.id
             LEFT JOIN sales s ON s.prospect_id = p.id AND s.status != 'cancelled'
             WHERE l.id > 0",
        );
        assert_eq!(a.structure, QueryStructure::MultiJoin);
        assert_eq!(a.joins.len(), 2);
        assert_eq!(a.joins[0].join_type, "LEFT JOIN");
        assert_eq!(a.joins[0].conditions, vec!["p.lead_id = l.id"]);
        assert_eq!(a.joins[1].conditions.len(), 2);
        assert_eq!(a.joins[1].conditions[1], "s.status != 'cancelled'");

        assert!(a
            .exclusions
            .iter()
            .any(|e| e.kind == "not_equals" && e.values == vec!["cancelled"]));
    }

    #[test]
    fn cross_join_has_no_conditions() {
        let a = analyze_query("SELECT * FROM a_tbl a CROSS JOIN b_tbl b");
        assert_eq!(a.joins.len(), 1);
        assert_eq!(a.joins[0].join_type, "CROSS JOIN");
        assert!(a.joins[0].conditions.is_empty());
    }

    #[test]
    fn cte_bodies_are_scanned_with_balanced_parens() {
        let a = analyze_query(
            "WITH base AS (
                 SELECT l.id, date_trunc('month', l.created_at) AS m
                 FROM leads l
                 JOIN prospects p ON p.lead_id = l.id
             ), rollup AS (
                 SELECT m, COUNT(*) FROM base GROUP BY m
             )
             SELECT * FROM rollup",
        );
        assert_eq!(a.structure, QueryStructure::Cte);
        assert_eq!(a.ctes.len(), 2);
        assert_eq!(a.ctes[0].name, "base");
        assert_eq!(a.ctes[0].tables, vec!["leads", "prospects"]);
        assert_eq!(a.ctes[1].name, "rollup");
        assert_eq!(a.ctes[1].tables, vec!["base"]);
    }

    #[test]
    fn extract_day_from_is_not_a_table() {
        let a = analyze_query(
            "SELECT 1 FROM sales s
             WHERE EXTRACT(DAY FROM s.closed_at) <= EXTRACT(DAY FROM CURRENT_DATE)",
        );
        assert_eq!(a.tables.len(), 1);
        assert_eq!(a.tables[0].name, "sales");
        assert_eq!(a.progressive_filters.len(), 1);
    }

    #[test]
    fn case_block_branches_and_else() {
        let a = analyze_query(
            "SELECT CASE
                 WHEN src.utm_source IN ('google', 'adwords') THEN 'paid_search'
                 WHEN src.utm_source IS NULL THEN 'direct'
                 ELSE 'other'
             END AS source_group
             FROM sources src",
        );
        assert_eq!(a.case_blocks.len(), 1);
        let block = &a.case_blocks[0];
        assert_eq!(block.branches.len(), 2);
        assert_eq!(block.branches[0].then, "'paid_search'");
        assert_eq!(block.else_value.as_deref(), Some("'other'"));
    }

    #[test]
    fn window_functions_with_partition_and_order() {
        let a = analyze_query(
            "SELECT ROW_NUMBER() OVER (PARTITION BY l.id ORDER BY p.qualified_at) AS rn
             FROM leads l JOIN prospects p ON p.lead_id = l.id",
        );
        assert_eq!(a.window_functions.len(), 1);
        let w = &a.window_functions[0];
        assert_eq!(w.function, "ROW_NUMBER");
        assert_eq!(w.partition_by.as_deref(), Some("l.id"));
        assert_eq!(w.order_by.as_deref(), Some("p.qualified_at"));
    }

    #[test]
    fn jsonb_and_positional_params() {
        let a = analyze_query(
            "SELECT payload ->> 'status' FROM events WHERE tenant = $1 AND payload @> '{\"kind\": \"sale\"}' AND n = $2",
        );
        assert_eq!(a.positional_params, vec!["$1", "$2"]);
        assert_eq!(a.jsonb_operations.len(), 2);
    }

    #[test]
    fn status_conditions_are_collected() {
        let a = analyze_query(
            "SELECT 1 FROM sales s WHERE s.status NOT IN ('cancelled', 'test') AND s.substatus = 'ok'",
        );
        assert_eq!(a.status_conditions.len(), 2);
        assert!(a.status_conditions[0].contains("NOT IN"));
    }

    #[test]
    fn prior_year_mtd_detected_with_column() {
        let a = analyze_query(
            "SELECT 1 FROM sales s
             WHERE s.closed_at + interval '330 minutes' >= date_trunc('month', CURRENT_DATE - interval '1 year')",
        );
        assert!(a
            .date_filters
            .iter()
            .any(|f| f.pattern == "prior_year_mtd" && f.column == "s.closed_at" && f.has_timezone));
    }

    #[test]
    fn interval_buckets() {
        assert_eq!(bucket_interval("330 minutes"), "330_minutes");
        assert_eq!(bucket_interval("5h30m"), "5h30m");
        assert_eq!(bucket_interval("1 day"), "other");
    }

    #[test]
    fn union_without_cte() {
        let a = analyze_query("SELECT id FROM leads UNION SELECT id FROM prospects");
        assert_eq!(a.structure, QueryStructure::Union);
    }

    #[test]
    fn every_catalog_pattern_analyzes_consistently() {
        // The embedded catalog is the canonical corpus: every pattern
        // must analyze without panicking, find its tables, and agree
        // with its own declared shape.
        let catalog = RulesCatalog::builtin();
        for (name, pattern) in &catalog.patterns {
            let a = analyze_query(&pattern.sql);
            assert!(!a.tables.is_empty(), "{name}: no tables found");
            if pattern.sql.to_uppercase().contains("WITH ") {
                assert!(!a.ctes.is_empty(), "{name}: CTE not detected");
            }
        }
    }

    #[test]
    fn structure_tag_serializes_snake_case() {
        let v = serde_json::to_value(QueryStructure::CteUnion).unwrap();
        assert_eq!(v, "cte_union");
    }
}
