//! 条件评估器
//!
//! 条件字段是评估上下文中的点分路径（如 `payload.tier`、`items.0.sku`），
//! 自动化的全部条件需同时满足（AND）。

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Condition, Operator};

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("条件值无效: {0}")]
    InvalidValue(String),
}

type EvalResult<T> = std::result::Result<T, ConditionError>;

/// 已编译正则缓存，模式在保存时已校验过
static REGEX_CACHE: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 全部条件满足时返回 true，空条件列表视为满足
    pub fn matches_all(conditions: &[Condition], context: &Value) -> EvalResult<bool> {
        for condition in conditions {
            let field_value = Self::get_field(context, &condition.field);
            if !Self::evaluate(field_value, condition.operator, &condition.value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 按点分路径读取字段，数字段可索引数组
    pub fn get_field<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.').try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// 保存自动化时校验条件定义
    pub fn validate(condition: &Condition) -> Result<(), String> {
        if condition.field.trim().is_empty() {
            return Err("条件字段不能为空".to_string());
        }

        let value = &condition.value;
        match condition.operator {
            Operator::Between => {
                let valid = value
                    .as_array()
                    .is_some_and(|arr| arr.len() == 2 && arr.iter().all(|v| Self::as_f64(v).is_some()));
                if !valid {
                    return Err(format!("{}: between 需要 [min, max] 数值数组", condition.field));
                }
            }
            Operator::In | Operator::NotIn => {
                if !value.is_array() {
                    return Err(format!("{}: {} 需要数组", condition.field, condition.operator));
                }
            }
            Operator::Regex => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| format!("{}: regex 需要字符串模式", condition.field))?;
                Regex::new(pattern)
                    .map_err(|e| format!("{}: 无效的正则表达式: {e}", condition.field))?;
            }
            Operator::Before | Operator::After => {
                Self::parse_datetime(value).map_err(|e| format!("{}: {e}", condition.field))?;
            }
            Operator::StartsWith | Operator::EndsWith => {
                if !value.is_string() {
                    return Err(format!("{}: {} 需要字符串", condition.field, condition.operator));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 评估单个条件
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected: &Value,
    ) -> EvalResult<bool> {
        match operator {
            Operator::IsEmpty => return Ok(Self::is_empty(field_value)),
            Operator::IsNotEmpty => return Ok(!Self::is_empty(field_value)),
            _ => {}
        }

        // 字段不存在时其余操作符一律不满足
        let Some(field) = field_value else {
            return Ok(false);
        };

        match operator {
            Operator::Eq => Ok(Self::eq(field, expected)),
            Operator::Neq => Ok(!Self::eq(field, expected)),
            Operator::Gt => Self::compare(field, expected, |a, b| a > b),
            Operator::Gte => Self::compare(field, expected, |a, b| a >= b),
            Operator::Lt => Self::compare(field, expected, |a, b| a < b),
            Operator::Lte => Self::compare(field, expected, |a, b| a <= b),
            Operator::Between => Self::between(field, expected),
            Operator::In => Self::in_list(field, expected),
            Operator::NotIn => Self::in_list(field, expected).map(|r| !r),
            Operator::Contains => Self::contains(field, expected),
            Operator::StartsWith => {
                Self::with_strings(field, expected, |s, prefix| s.starts_with(prefix))
            }
            Operator::EndsWith => Self::with_strings(field, expected, |s, suffix| s.ends_with(suffix)),
            Operator::Regex => Self::regex_match(field, expected),
            Operator::Before => Self::time_compare(field, expected, |a, b| a < b),
            Operator::After => Self::time_compare(field, expected, |a, b| a > b),
            Operator::IsEmpty | Operator::IsNotEmpty => Ok(false),
        }
    }

    fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    /// 数值统一转为浮点比较（100 == 100.0）
    fn eq(field: &Value, expected: &Value) -> bool {
        if let (Some(a), Some(b)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return (a - b).abs() < f64::EPSILON;
        }
        field == expected
    }

    fn compare(field: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> EvalResult<bool> {
        Ok(cmp(Self::number(field)?, Self::number(expected)?))
    }

    fn between(field: &Value, expected: &Value) -> EvalResult<bool> {
        let bounds = expected.as_array().ok_or_else(|| Self::mismatch("array [min, max]", expected))?;
        let [min, max] = bounds.as_slice() else {
            return Err(ConditionError::InvalidValue(
                "between 操作符需要 [min, max] 数组".to_string(),
            ));
        };
        let value = Self::number(field)?;
        Ok(value >= Self::number(min)? && value <= Self::number(max)?)
    }

    fn in_list(field: &Value, expected: &Value) -> EvalResult<bool> {
        let items = expected.as_array().ok_or_else(|| Self::mismatch("array", expected))?;
        Ok(items.iter().any(|item| Self::eq(field, item)))
    }

    fn contains(field: &Value, expected: &Value) -> EvalResult<bool> {
        match field {
            Value::String(s) => {
                let needle = expected.as_str().ok_or_else(|| Self::mismatch("string", expected))?;
                Ok(s.contains(needle))
            }
            Value::Array(items) => Ok(items.iter().any(|item| Self::eq(item, expected))),
            other => Err(Self::mismatch("string or array", other)),
        }
    }

    fn with_strings(
        field: &Value,
        expected: &Value,
        check: impl Fn(&str, &str) -> bool,
    ) -> EvalResult<bool> {
        let s = field.as_str().ok_or_else(|| Self::mismatch("string", field))?;
        let pattern = expected.as_str().ok_or_else(|| Self::mismatch("string", expected))?;
        Ok(check(s, pattern))
    }

    fn regex_match(field: &Value, expected: &Value) -> EvalResult<bool> {
        let s = field.as_str().ok_or_else(|| Self::mismatch("string", field))?;
        let pattern = expected
            .as_str()
            .ok_or_else(|| Self::mismatch("string (regex pattern)", expected))?;

        if let Some(regex) = REGEX_CACHE.get(pattern) {
            return Ok(regex.is_match(s));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            ConditionError::InvalidValue(format!("无效的正则表达式 '{pattern}': {e}"))
        })?;
        let matched = regex.is_match(s);
        REGEX_CACHE.insert(pattern.to_string(), regex);
        Ok(matched)
    }

    fn time_compare(
        field: &Value,
        expected: &Value,
        cmp: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    ) -> EvalResult<bool> {
        Ok(cmp(Self::parse_datetime(field)?, Self::parse_datetime(expected)?))
    }

    /// 支持 RFC 3339 时间与 `YYYY-MM-DD` 日期
    fn parse_datetime(value: &Value) -> EvalResult<DateTime<Utc>> {
        let s = value.as_str().ok_or_else(|| Self::mismatch("datetime string", value))?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ConditionError::InvalidValue(format!("无法解析日期时间: '{s}'")))
    }

    fn number(value: &Value) -> EvalResult<f64> {
        Self::as_f64(value).ok_or_else(|| Self::mismatch("number", value))
    }

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn mismatch(expected: &str, actual: &Value) -> ConditionError {
        ConditionError::TypeMismatch {
            expected: expected.to_string(),
            actual: Self::type_name(actual).to_string(),
        }
    }

    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
