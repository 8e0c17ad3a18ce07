//! CSV rendering for the raw trial export.
//!
//! One row per trial across all runs of a test, ordered by run then trial.
//! The output is prefixed with a UTF-8 byte-order mark so spreadsheet tools
//! detect the encoding, fields are comma-separated and rows newline-separated,
//! and any field containing a comma, double quote or newline is wrapped in
//! double quotes with internal quotes doubled.

use std::borrow::Cow;

use crate::storage::ExportRow;

/// Column headers of the export, in order.
pub const EXPORT_HEADER: [&str; 6] = [
    "Genero",
    "Idade",
    "Marca",
    "Palavra",
    "Resultado",
    "Tempo de resposta",
];

/// UTF-8 byte-order mark prefixed to the output.
const BOM: &str = "\u{feff}";

/// Localized label for a trial classification, as exported.
pub fn classification_label(positive: bool) -> &'static str {
    if positive {
        "positivo"
    } else {
        "negativo"
    }
}

/// Quote a field if it contains a delimiter, quote or newline.
fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Render export rows as CSV bytes, BOM and header included.
pub fn render_export(rows: &[ExportRow]) -> Vec<u8> {
    let mut lines = Vec::with_capacity(rows.len() + 1);

    lines.push(
        EXPORT_HEADER
            .iter()
            .map(|h| escape(h).into_owned())
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in rows {
        let age = row.age.map(|a| a.to_string()).unwrap_or_default();
        let fields = [
            row.gender.as_deref().unwrap_or(""),
            &age,
            &row.brand_name,
            &row.word_text,
            classification_label(row.positive),
            &row.rt_ms.to_string(),
        ]
        .map(|f| escape(f).into_owned());

        lines.push(fields.join(","));
    }

    format!("{}{}", BOM, lines.join("\n")).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(brand: &str, word: &str, positive: bool, rt_ms: i64) -> ExportRow {
        ExportRow {
            gender: None,
            age: None,
            brand_name: brand.to_string(),
            word_text: word.to_string(),
            positive,
            rt_ms,
        }
    }

    #[test]
    fn test_plain_fields_unquoted() {
        assert_eq!(escape("cafe"), "cafe");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_comma_field_quoted() {
        assert_eq!(escape("foo,bar"), "\"foo,bar\"");
    }

    #[test]
    fn test_inner_quotes_doubled() {
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_newline_field_quoted() {
        assert_eq!(escape("a\nb"), "\"a\nb\"");
    }

    #[test]
    fn test_export_starts_with_bom_and_header() {
        let out = render_export(&[]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with('\u{feff}'));
        assert_eq!(
            text.trim_start_matches('\u{feff}'),
            "Genero,Idade,Marca,Palavra,Resultado,Tempo de resposta"
        );
    }

    #[test]
    fn test_unset_demographics_are_empty_fields() {
        let out = render_export(&[row("A", "bom", true, 321)]);
        let text = String::from_utf8(out).unwrap();
        let data_line = text.lines().nth(1).unwrap();
        assert_eq!(data_line, ",,A,bom,positivo,321");
    }

    #[test]
    fn test_demographics_rendered_when_present() {
        let mut r = row("A", "bom", false, 250);
        r.gender = Some("feminino".to_string());
        r.age = Some(31);
        let out = render_export(&[r]);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), "feminino,31,A,bom,negativo,250");
    }

    #[test]
    fn test_classification_labels() {
        assert_eq!(classification_label(true), "positivo");
        assert_eq!(classification_label(false), "negativo");
    }
}
