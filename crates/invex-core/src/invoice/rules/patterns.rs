//! Common regex patterns for French and English invoice extraction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // SIRET (14 digits) and SIREN (9 digits), French company registration
    pub static ref SIRET_LABELED: Regex = Regex::new(
        r"(?i)\bSIRE([TN])\s*(?:n[°º]\s*)?:?\s*(\d{3}[ \u{a0}]?\d{3}[ \u{a0}]?\d{3}(?:[ \u{a0}]?\d{5})?)\b"
    ).unwrap();

    pub static ref SIRET_STANDALONE: Regex = Regex::new(
        r"\b(\d{3})[ \u{a0}]?(\d{3})[ \u{a0}]?(\d{3})[ \u{a0}]?(\d{5})\b"
    ).unwrap();

    pub static ref RCS_NUMBER: Regex = Regex::new(
        r"(?i)\bR\.?\s?C\.?\s?S\.?\s+(?:[A-ZÀ-Ÿ][\p{L}\-]*\s+){1,2}(?:[AB]\s+)?(\d{3}[ \u{a0}]?\d{3}[ \u{a0}]?\d{3})\b"
    ).unwrap();

    // Intra-community VAT numbers
    pub static ref VAT_FR: Regex = Regex::new(
        r"\bFR[ \u{a0}]?([0-9A-Z]{2})[ \u{a0}]?(\d{3})[ \u{a0}]?(\d{3})[ \u{a0}]?(\d{3})\b"
    ).unwrap();

    pub static ref VAT_CH: Regex = Regex::new(
        r"\bCHE[-\s]?(\d{3})\.?(\d{3})\.?(\d{3})(?:\s*(?:TVA|MWST|IVA))?\b"
    ).unwrap();

    pub static ref VAT_EU: Regex = Regex::new(
        r"\b(?:DE\s?\d{9}|BE\s?[01]\d{9}|LU\s?\d{8}|IT\s?\d{11}|ES\s?[0-9A-Z]\d{7}[0-9A-Z]|NL\s?\d{9}B\d{2}|GB\s?\d{9}(?:\d{3})?)\b"
    ).unwrap();

    pub static ref VAT_LABEL: Regex = Regex::new(
        r"(?i)(?:n[°º]\s*(?:de\s+)?tva|tva\s+intra|num[ée]ro\s+(?:de\s+)?tva|identifiant\s+tva|vat\s*(?:no\.?|number|id|reg)|ust-?id)"
    ).unwrap();

    // Dates
    pub static ref DATE_DMY: Regex = Regex::new(
        r"\b(\d{1,2})[./\-](\d{1,2})[./\-](\d{4}|\d{2})\b"
    ).unwrap();

    pub static ref DATE_YMD: Regex = Regex::new(
        r"\b(\d{4})[./\-](\d{1,2})[./\-](\d{1,2})\b"
    ).unwrap();

    pub static ref DATE_LONG: Regex = Regex::new(
        r"(?i)\b(\d{1,2})(?:er)?\s+(janvier|février|fevrier|mars|avril|mai|juin|juillet|août|aout|septembre|octobre|novembre|décembre|decembre|january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b\.?,?\s+(\d{4})\b"
    ).unwrap();

    pub static ref DATE_LONG_EN: Regex = Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b"
    ).unwrap();

    // Labeled dates
    pub static ref DUE_DATE_LABEL: Regex = Regex::new(
        r"(?i)(?:date\s+d'[ée]ch[ée]ance|[ée]ch[ée]ance|due\s+date|payment\s+due|payable\s+(?:avant\s+)?le|[àa]\s+payer\s+avant\s+le|date\s+limite\s+de\s+(?:paiement|r[èe]glement))"
    ).unwrap();

    pub static ref ISSUE_DATE_LABEL: Regex = Regex::new(
        r"(?i)(?:date\s+(?:de\s+(?:la\s+)?)?facture|date\s+d'[ée]mission|date\s+de\s+facturation|invoice\s+date|date\s+of\s+issue|[ée]mise?\s+le|fait\s+le)"
    ).unwrap();

    pub static ref GENERIC_DATE_LABEL: Regex = Regex::new(
        r"(?i)\bdate\b|\bdu\b|\ble\b"
    ).unwrap();

    // Amounts: 1 200,00 / 1.200,00 / 1,200.00 / 1'200.00 / 1200.00
    pub static ref AMOUNT: Regex = Regex::new(
        r"-?(?:\b\d{1,3}(?:[ \u{a0}'’.,]\d{3})+[.,]\d{2}\b|\b\d+[.,]\d{2}\b)"
    ).unwrap();

    pub static ref PERCENT: Regex = Regex::new(
        r"\b(\d{1,2}(?:[.,]\d{1,2})?)\s?%"
    ).unwrap();

    // Totals
    pub static ref AMOUNT_DUE_LABEL: Regex = Regex::new(
        r"(?i)(?:net\s+[àa]\s+payer|montant\s+[àa]\s+payer|reste\s+[àa]\s+payer|solde\s+d[uû]|amount\s+due|balance\s+due|total\s+due)"
    ).unwrap();

    pub static ref TOTAL_INCL_LABEL: Regex = Regex::new(
        r"(?i)(?:total\s+T\.?T\.?C\.?|montant\s+T\.?T\.?C\.?|total\s+toutes\s+taxes|total\s+incl\.?\s*(?:vat|tax|tva)|total\s+amount|montant\s+total|grand\s+total|total\s+TVA\s+incluse)"
    ).unwrap();

    pub static ref SUBTOTAL_LABEL: Regex = Regex::new(
        r"(?i)(?:sous[-\s]?total(?:\s+H\.?T\.?)?|total\s+H\.?T\.?|montant\s+H\.?T\.?|total\s+hors\s+taxes?|sub[-\s]?total|total\s+excl\.?\s*(?:vat|tax|tva)|net\s+amount)"
    ).unwrap();

    pub static ref TOTAL_VAT_LABEL: Regex = Regex::new(
        r"(?i)(?:total\s+TVA|montant\s+(?:de\s+la\s+)?TVA|\bTVA\b|total\s+VAT|\bVAT\b|\bMWST\b)(?:\s*\(?\s*\d{1,2}(?:[.,]\d{1,2})?\s?%\s*\)?)?"
    ).unwrap();

    pub static ref BARE_TOTAL: Regex = Regex::new(
        r"(?i)^\s*total\b\s*:?"
    ).unwrap();

    // Invoice identification
    pub static ref INVOICE_NUMBER_LABELED: Regex = Regex::new(
        r"(?i)(?:(?:facture|invoice)\s*(?:n[°ºo]\.?|num[ée]ro|no\.?|#|number|nr\.?)|n[°º]\s*(?:de\s+)?facture|num[ée]ro\s+de\s+facture)\s*:?\s*([A-Z0-9][A-Z0-9\-/_.]*\d[A-Z0-9\-/_]*)"
    ).unwrap();

    pub static ref INVOICE_NUMBER_TITLE: Regex = Regex::new(
        r"(?i)\b(?:facture|invoice)\s+([A-Z]{0,6}[\-/_]?\d[A-Z0-9\-/_]*)"
    ).unwrap();

    pub static ref INVOICE_NUMBER_REFERENCE: Regex = Regex::new(
        r"(?i)\br[ée]f(?:[ée]rence)?\.?\s*(?:n[°º]\s*)?:?\s*([A-Z0-9][A-Z0-9\-/_]*\d[A-Z0-9\-/_]*)"
    ).unwrap();

    pub static ref INVOICE_NUMBER_STANDALONE: Regex = Regex::new(
        r"\b((?:FAC|FACT|FA|INV|F)[\-/_]?\d{2,4}[\-/_]?\d{1,6}(?:[\-/_]\d+)?)\b"
    ).unwrap();

    pub static ref PAYMENT_TERMS_LABELED: Regex = Regex::new(
        r"(?i)(?:conditions?\s+de\s+(?:paiement|r[èe]glement)|modalit[ée]s\s+de\s+(?:paiement|r[èe]glement)|payment\s+terms|terms\s+of\s+payment|mode\s+de\s+r[èe]glement)\s*:?\s*([^\t\n]{3,80})"
    ).unwrap();

    pub static ref PAYMENT_TERMS_PHRASE: Regex = Regex::new(
        r"(?i)(?:paiement|r[èe]glement|payable)?\s*(?:[àa]\s+)?(?:\d{1,3}\s+jours(?:\s+fin\s+de\s+mois)?(?:\s+nets?)?|[àa]\s+r[ée]ception(?:\s+de\s+(?:la\s+)?facture)?|net\s+\d{1,3}(?:\s+days)?|due\s+on\s+receipt|comptant)"
    ).unwrap();

    // Parties
    pub static ref CUSTOMER_MARKER: Regex = Regex::new(
        r"(?i)^\s*(?:factur[ée]e?\s+[àa]|client|destinataire|adresse\s+de\s+facturation|bill(?:ed)?\s+to|customer|sold\s+to)\b\s*:?\s*"
    ).unwrap();

    pub static ref SUPPLIER_MARKER: Regex = Regex::new(
        r"(?i)^\s*(?:fournisseur|[ée]metteur|vendeur|prestataire|supplier|seller|from)\b\s*:?\s*"
    ).unwrap();

    pub static ref CUSTOMER_ID: Regex = Regex::new(
        r"(?i)(?:n[°º]\s*(?:de\s+)?client|num[ée]ro\s+(?:de\s+)?client|code\s+client|client\s+n[°º]|r[ée]f(?:[ée]rence)?\s+client|customer\s+(?:id|no\.?|number))\s*:?\s*([A-Z0-9][A-Z0-9\-/_]*)"
    ).unwrap();

    pub static ref LEGAL_SUFFIX: Regex = Regex::new(
        r"(?i)\b(?:SARL|SASU|SAS|SA|EURL|SNC|SCI|SCOP|SELARL|GmbH|AG|S[àa]rl|Ltd|Limited|Inc|LLC|PLC|BV|NV|SpA|Srl)\b\.?"
    ).unwrap();

    // Address parts
    pub static ref POSTAL_CITY: Regex = Regex::new(
        r"\b(?:F-)?(\d{5}|CH-\d{4})[ \u{a0}]+([A-ZÀ-Ÿ][\p{L}'’\-]*(?:[ \-][\p{L}'’\-]+){0,3})"
    ).unwrap();

    pub static ref STREET: Regex = Regex::new(
        r"(?i)\b(\d{1,4}(?:\s?(?:bis|ter))?,?\s+(?:rue|avenue|av\.|boulevard|bd|place|chemin|all[ée]e|impasse|quai|route|rte|cours|square|passage|voie|esplanade|faubourg|street|st\.|road|rd\.|lane|drive)\b[^\t\n]*)"
    ).unwrap();

    pub static ref STREET_NO_NUMBER: Regex = Regex::new(
        r"(?i)^\s*((?:rue|avenue|boulevard|chemin|place|all[ée]e|impasse|quai|route|zone\s+industrielle|za|zi)\s[^\t\n]+)"
    ).unwrap();

    pub static ref COUNTRY: Regex = Regex::new(
        r"(?i)\b(France|Suisse|Switzerland|Belgique|Belgium|Luxembourg|Allemagne|Germany|Espagne|Spain|Italie|Italy|Royaume-Uni|United\s+Kingdom|Monaco)\b"
    ).unwrap();

    // Lines carrying identifiers rather than address data
    pub static ref IDENTIFIER_LINE: Regex = Regex::new(
        r"(?i)\b(?:siret|siren|r\.?c\.?s|tva|vat|iban|bic|swift|capital|t[ée]l|phone|fax|ape|naf)\b"
    ).unwrap();

    // Lines that title or label something rather than name a party
    pub static ref NON_NAME_LINE: Regex = Regex::new(
        r"(?i)^\s*(?:facture|invoice|devis|avoir|date|page|n[°º]|r[ée]f|total|objet|description|d[ée]signation|conditions|merci|iban|bic)\b"
    ).unwrap();

    // Contact details
    pub static ref EMAIL: Regex = Regex::new(
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"
    ).unwrap();

    pub static ref PHONE_LABELED: Regex = Regex::new(
        r"(?i)\b(?:t[ée]l(?:[ée]phone)?|phone|mobile|portable)\.?\s*:?\s*(\+?[\d(][\d \u{a0}.\-()]{6,}\d)"
    ).unwrap();

    pub static ref PHONE: Regex = Regex::new(
        r"(?:\+33[ \u{a0}.]?|0033[ \u{a0}.]?|\b0)[1-9](?:[ \u{a0}.\-]?\d{2}){4}\b|\+41[ \u{a0}.]?\d{2}[ \u{a0}.]?\d{3}(?:[ \u{a0}.]?\d{2}){2}\b"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_shapes() {
        let found: Vec<&str> = AMOUNT
            .find_iter("1 200,00 | 1.200,00 | 1,200.00 | 1'200.00 | 45.50")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["1 200,00", "1.200,00", "1,200.00", "1'200.00", "45.50"]);
        assert!(!AMOUNT.is_match("FR40 303 265 045"));
    }

    #[test]
    fn test_customer_marker_anchors_at_line_start() {
        assert!(CUSTOMER_MARKER.is_match("Facturé à : Dupont SA"));
        assert!(CUSTOMER_MARKER.is_match("Client"));
        assert!(CUSTOMER_MARKER.is_match("Bill to"));
        assert!(!CUSTOMER_MARKER.is_match("N° client : C-042"));
    }

    #[test]
    fn test_totals_labels() {
        assert!(TOTAL_INCL_LABEL.is_match("Total TTC"));
        assert!(SUBTOTAL_LABEL.is_match("Total HT"));
        assert!(!SUBTOTAL_LABEL.is_match("Total TTC"));
        assert!(TOTAL_VAT_LABEL.is_match("TVA (20%)"));
        assert!(AMOUNT_DUE_LABEL.is_match("Net à payer"));
    }

    #[test]
    fn test_postal_city() {
        let caps = POSTAL_CITY.captures("12 rue de la Paix, 75002 Paris").unwrap();
        assert_eq!(&caps[1], "75002");
        assert_eq!(&caps[2], "Paris");
    }
}
