//! Text normalization and classification.
//!
//! Carrier portals report events as free pt-BR text with inconsistent casing,
//! accents, and date formats. Everything here is pure and total: bad input
//! yields `None`/`false`, never a panic.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::types::OrderStatus;

/// Parse a carrier-reported date.
///
/// Accepts `DD/MM/YY[YY][ HH:MM]` (two-digit years pivot to 2000+YY) and ISO
/// `YYYY-MM-DD`, with or without a time component. Invalid calendar dates
/// (`31/02/24`) and unparseable input yield `None`.
pub fn parse_locale_date(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    // ISO: YYYY-MM-DD, optionally with time / offset
    if s.len() >= 10 && s.as_bytes().get(4) == Some(&b'-') && s.as_bytes().get(7) == Some(&b'-') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s[..19.min(s.len())], "%Y-%m-%dT%H:%M:%S") {
            return Some(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
        return None;
    }

    // pt-BR: DD/MM/YY[YY], optional "HH:MM" after whitespace or 'T'
    let mut parts = s.splitn(2, |c: char| c.is_whitespace() || c == 'T');
    let date_part = parts.next()?;
    let time_part = parts.next().map(str::trim);

    let mut fields = date_part.split('/');
    let day: u32 = fields.next()?.parse().ok()?;
    let month: u32 = fields.next()?.parse().ok()?;
    let mut year: i32 = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    if year < 100 {
        year += 2000;
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let (hour, minute) = match time_part {
        Some(t) if !t.is_empty() => {
            let mut hm = t.split(':');
            let h: u32 = hm.next()?.parse().ok()?;
            let m: u32 = hm.next().and_then(|m| m.get(..2)).unwrap_or("0").parse().ok()?;
            (h, m)
        }
        _ => (0, 0),
    };

    let dt = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&dt))
}

/// Uppercase and strip diacritics so keyword matching is accent-insensitive
/// (`"SITUAÇÃO"` ≡ `"SITUACAO"`).
///
/// The keyword vocabulary is closed and Latin-1, so a fixed fold table covers
/// every character the carriers emit.
pub fn normalize_for_match(input: &str) -> String {
    input
        .chars()
        .flat_map(|c| c.to_uppercase())
        .map(|c| match c {
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'Ç' => 'C',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Keywords that signal a delivery problem.
const OCCURRENCE_KEYWORDS: &[&str] = &[
    "TENTATIVA DE ENTREGA",
    "DESTINATARIO AUSENTE",
    "ENDERECO NAO ENCONTRADO",
    "ENDERECO INCORRETO",
    "ESTABELECIMENTO FECHADO",
    "AVARIA",
    "EXTRAVIO",
    "RETIDO",
    "RECUSADO",
    "SUSTADO",
    "IMPEDIMENTO",
];

/// Detect whether event text represents a delivery problem.
///
/// The bare word "OCORRENCIA" is ambiguous: carriers use it both for
/// problems and for plain progress notes, so the exclusions
/// (`SEM OCORRENCIA`, `OCORRENCIA DE ENTREGA`) are checked before the
/// inclusion.
pub fn detect_occurrence(text: &str) -> bool {
    let t = normalize_for_match(text);
    if OCCURRENCE_KEYWORDS.iter().any(|kw| t.contains(kw)) {
        return true;
    }
    t.contains("OCORRENCIA") && !t.contains("SEM OCORRENCIA") && !t.contains("OCORRENCIA DE ENTREGA")
}

const DELIVERED_KEYWORDS: &[&str] = &[
    "ENTREGUE",
    "ENTREGA REALIZADA",
    "ENTREGA EFETUADA",
    "OCORRENCIA DE ENTREGA",
];

const CANCELLED_KEYWORDS: &[&str] = &["DEVOLV", "RETORNO", "CANCELAD"];

const IN_TRANSIT_KEYWORDS: &[&str] = &[
    "SAIU PARA ENTREGA",
    "EM ROTA",
    "SAIDA PARA ENTREGA",
    "EM TRANSITO",
    "TRANSFERENCIA",
    "COLETADO",
    "COLETA REALIZADA",
    "EXPEDIDO",
    "EM DISTRIBUICAO",
    "CHEGADA EM UNIDADE",
    "CHEGADA NA UNIDADE",
    "EM SEPARACAO",
    "RECEBIDO",
    "AGUARDANDO",
    "TRANSBORDO",
    "MANIFESTADO",
    "CONHECIMENTO EMITIDO",
];

/// Map event text to a canonical status.
///
/// The ladder is evaluated DELIVERED → CANCELLED → IN_TRANSIT; precedence
/// matters because late events routinely carry tokens from earlier phases
/// ("Mercadoria CANCELADA - estava em transito" must classify as cancelled).
/// Unrecognized text yields `None`: the caller keeps the previous status.
pub fn classify_status(text: &str) -> Option<OrderStatus> {
    let t = normalize_for_match(text);
    if DELIVERED_KEYWORDS.iter().any(|kw| t.contains(kw)) {
        return Some(OrderStatus::Delivered);
    }
    if CANCELLED_KEYWORDS.iter().any(|kw| t.contains(kw)) {
        return Some(OrderStatus::Cancelled);
    }
    if IN_TRANSIT_KEYWORDS.iter().any(|kw| t.contains(kw)) {
        return Some(OrderStatus::InTransit);
    }
    None
}

/// Keep only ASCII digits. Sender/recipient documents (CNPJ/CPF) arrive with
/// punctuation; carriers want them bare.
pub fn only_digits(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Normalize an invoice number: strip non-digits, then leading zeros.
/// Carriers are inconsistent about zero padding, so both sides of every
/// comparison go through this.
pub fn normalize_invoice_number(input: &str) -> String {
    let digits = only_digits(input);
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        // All zeros (or nothing at all): keep a single zero if any digit existed.
        if digits.is_empty() {
            String::new()
        } else {
            "0".to_string()
        }
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parse_br_date_with_time() {
        let dt = parse_locale_date("05/03/24 14:30").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap());
    }

    #[test]
    fn parse_br_date_four_digit_year() {
        let dt = parse_locale_date("10/01/2024").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn parse_invalid_calendar_date() {
        assert!(parse_locale_date("31/02/24").is_none());
    }

    #[test]
    fn parse_iso_date() {
        let dt = parse_locale_date("2024-03-05").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn parse_iso_datetime_with_offset() {
        let dt = parse_locale_date("2024-03-05T10:00:00.000Z").unwrap();
        assert_eq!(dt.hour(), 10);
    }

    #[test]
    fn parse_garbage() {
        assert!(parse_locale_date("").is_none());
        assert!(parse_locale_date("amanhã").is_none());
        assert!(parse_locale_date("12/34").is_none());
        assert!(parse_locale_date("1/2/3/4").is_none());
    }

    #[test]
    fn normalize_strips_accents() {
        assert_eq!(normalize_for_match("Situação"), "SITUACAO");
        assert_eq!(normalize_for_match("previsão de entrega"), "PREVISAO DE ENTREGA");
    }

    #[test]
    fn occurrence_exclusions_win() {
        assert!(!detect_occurrence("SEM OCORRENCIA"));
        assert!(!detect_occurrence("Ocorrência de entrega"));
        assert!(detect_occurrence("OCORRENCIA NA FILIAL"));
        assert!(detect_occurrence("TENTATIVA DE ENTREGA NAO REALIZADA"));
        assert!(detect_occurrence("Destinatário ausente"));
        assert!(!detect_occurrence("Em trânsito para filial destino"));
    }

    #[test]
    fn classify_delivered() {
        assert_eq!(classify_status("Mercadoria entregue ao destinatário"), Some(OrderStatus::Delivered));
        assert_eq!(classify_status("ENTREGA EFETUADA"), Some(OrderStatus::Delivered));
    }

    #[test]
    fn classify_cancelled_takes_precedence_over_transit() {
        assert_eq!(
            classify_status("Mercadoria CANCELADA - estava em transito"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(classify_status("Devolvido ao remetente"), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn classify_delivered_takes_precedence_over_cancelled() {
        // "Entrega realizada apos retorno" carries a CANCELLED token too.
        assert_eq!(
            classify_status("Entrega realizada apos retorno"),
            Some(OrderStatus::Delivered)
        );
    }

    #[test]
    fn classify_in_transit() {
        assert_eq!(classify_status("Saiu para entrega"), Some(OrderStatus::InTransit));
        assert_eq!(classify_status("Coletado"), Some(OrderStatus::InTransit));
        assert_eq!(classify_status("Chegada na unidade de destino"), Some(OrderStatus::InTransit));
        assert_eq!(classify_status("Conhecimento emitido"), Some(OrderStatus::InTransit));
    }

    #[test]
    fn classify_unknown() {
        assert_eq!(classify_status("Pedido registrado"), None);
    }

    #[test]
    fn invoice_normalization() {
        assert_eq!(normalize_invoice_number("000009089"), "9089");
        assert_eq!(normalize_invoice_number("NF 12.345"), "12345");
        assert_eq!(normalize_invoice_number("0000"), "0");
        assert_eq!(normalize_invoice_number(""), "");
        assert_eq!(only_digits("47.715.256/0001-49"), "47715256000149");
    }
}
