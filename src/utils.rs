use crate::prelude::*;

pub fn format_date(date: DateTime) -> String {
  date.format("%d.%m.%Y %H:%M").to_string()
}

pub fn format_duration(duration: TimeDelta) -> String {
  format!(
    "{}d {}h {}m",
    duration.num_days(),
    duration.num_hours() % 24,
    duration.num_minutes() % 60
  )
}

/// `50000` kopecks -> `500 ₽`, `1050` -> `10.50 ₽`
pub fn format_price(minor: i64) -> String {
  if minor % 100 == 0 {
    format!("{} ₽", minor / 100)
  } else {
    format!("{}.{:02} ₽", minor / 100, (minor % 100).abs())
  }
}

/// Inverse of [`format_price`]: `500` -> `50000`, `10.5` -> `1050`
pub fn parse_price(input: &str) -> Option<i64> {
  let input = input.trim().trim_end_matches('₽').trim();
  let (whole, frac) = input.split_once(['.', ',']).unwrap_or((input, ""));

  if whole.is_empty() || frac.len() > 2 {
    return None;
  }
  if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
    return None;
  }

  let whole: i64 = whole.parse().ok()?;
  let frac: i64 =
    if frac.is_empty() { 0 } else { format!("{frac:0<2}").parse().ok()? };
  whole.checked_mul(100)?.checked_add(frac)
}

/// Telegram rejects messages above 4096 characters, leave room for entities.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4000;

/// Splits a long message at line boundaries so every chunk fits into one
/// Telegram message.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
  let max_len =
    if max_len == 0 { TELEGRAM_MAX_MESSAGE_LENGTH } else { max_len };

  if text.len() <= max_len {
    return vec![text.to_string()];
  }

  let mut chunks = Vec::new();
  let mut current = String::new();

  for line in text.lines() {
    if !current.is_empty() && current.len() + line.len() + 1 > max_len {
      chunks.push(std::mem::take(&mut current));
    }

    if line.len() > max_len {
      if !current.is_empty() {
        chunks.push(std::mem::take(&mut current));
      }
      let mut rest = line;
      while rest.len() > max_len {
        let mut cut = max_len;
        while !rest.is_char_boundary(cut) {
          cut -= 1;
        }
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
      }
      current = rest.to_string();
    } else {
      if !current.is_empty() {
        current.push('\n');
      }
      current.push_str(line);
    }
  }

  if !current.is_empty() {
    chunks.push(current);
  }

  chunks
}
