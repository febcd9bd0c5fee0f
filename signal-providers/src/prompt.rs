//! Standard analyst prompt shared by language-model providers

use common::{MarketContext, SignalRequest};
use serde_json::Value;

/// Lists longer than this are truncated when rendered into the prompt
const MAX_LIST_ITEMS: usize = 5;

/// Render market context as `key: value` lines
pub fn format_market_context(context: &MarketContext) -> String {
    context
        .iter()
        .map(|(key, value)| format!("{}: {}", key, format_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Array(items) if items.len() > MAX_LIST_ITEMS => {
            let shown: Vec<String> = items.iter().take(MAX_LIST_ITEMS).map(format_value).collect();
            format!("[{}]... (showing first {} of {})", shown.join(", "), MAX_LIST_ITEMS, items.len())
        }
        Value::Array(items) => {
            let shown: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", shown.join(", "))
        }
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) => format!("{:.4}", f),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the trading-signal prompt asking for a strict JSON answer
pub fn build_prompt(request: &SignalRequest) -> String {
    format!(
        r#"You are an expert trading analyst. Analyze the following market data and provide a trading recommendation.

Market Data:
{context}

Current Context:
- Pair: {pair}
- Timeframe: {timeframe}
- Current Price: {price}

Please provide your analysis in the following JSON format:
{{
    "decision": "BUY" or "SELL" or "HOLD",
    "confidence": 0.0 to 1.0,
    "reasoning": "Brief explanation of your decision",
    "risk_level": "low" or "medium" or "high",
    "suggested_stop_loss": price level (optional),
    "suggested_take_profit": price level (optional)
}}

Respond ONLY with valid JSON, no additional text."#,
        context = format_market_context(&request.market_context),
        pair = request.pair,
        timeframe = request.timeframe,
        price = request.current_price,
    )
}
