/// EAペイロード向けの寛容な型強制ユーティリティ。
///
/// 上流は数値を文字列として返すことが多く、欠損やゴミ値も混ざる。
/// パースに失敗した値はすべて `None` になり、決してエラーにしない。
use serde_json::Value;

pub(crate) fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

pub(crate) fn as_i32(value: Option<&Value>) -> Option<i32> {
    as_i64(value).and_then(|v| i32::try_from(v).ok())
}

pub(crate) fn as_f32(value: Option<&Value>) -> Option<f32> {
    match value? {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

pub(crate) fn as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
