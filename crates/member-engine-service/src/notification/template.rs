//! 文案变量替换
//!
//! 支持 `{{variable}}` 与点分路径 `{{payload.tier}}`，变量取自执行上下文。
//! 未找到的变量保留原样。

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::automation::ConditionEvaluator;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("变量正则"));

pub fn render(template: &str, context: &Value) -> String {
    VARIABLE
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match ConditionEvaluator::get_field(context, name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => {
                    warn!(variable = name, "模板变量未找到，保留原样");
                    caps[0].to_string()
                }
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}
