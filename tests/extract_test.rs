use bounce_extract::*;

const NDR_REPORT: &str = "Reporting-MTA: dns; mx.b.co\r\n\
                          Arrival-Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
                          \r\n\
                          Final-Recipient: rfc822; a@b.co\r\n\
                          Action: failed\r\n\
                          Status: 5.1.1\r\n\
                          Diagnostic-Code: smtp;550 5.1.1 <a@b.co>: Recipient address rejected: b.co\r\n";

// --- SMTP response pattern ---

#[test]
fn test_pattern_smtp_and_ndr() {
    let m = match_smtp_response("550 5.1.1 <a@b.co>: Recipient address rejected");
    assert_eq!(m.smtp_code.as_deref(), Some("550"));
    assert_eq!(m.ndr_code.as_deref(), Some("5.1.1"));
    assert_eq!(m.detail, "<a@b.co>: Recipient address rejected");
}

#[test]
fn test_pattern_leading_ndr_without_smtp() {
    let m = match_smtp_response("5.1.0 The email account that you tried to reach is disabled. ");
    assert_eq!(m.smtp_code, None);
    assert_eq!(m.ndr_code.as_deref(), Some("5.1.0"));
    assert_eq!(
        m.detail,
        "The email account that you tried to reach is disabled."
    );
}

#[test]
fn test_pattern_ndr_before_smtp() {
    let m = match_smtp_response("4.2.2 452 Mailbox full");
    assert_eq!(m.smtp_code.as_deref(), Some("452"));
    assert_eq!(m.ndr_code.as_deref(), Some("4.2.2"));
    assert_eq!(m.detail, "Mailbox full");
}

#[test]
fn test_pattern_smtp_only_with_continuation_dash() {
    let m = match_smtp_response("421-Service not available");
    assert_eq!(m.smtp_code.as_deref(), Some("421"));
    assert_eq!(m.ndr_code, None);
    assert_eq!(m.detail, "Service not available");
}

#[test]
fn test_pattern_no_codes() {
    let m = match_smtp_response("Connection timed out");
    assert!(!m.has_code());
    assert_eq!(m.detail, "Connection timed out");
}

#[test]
fn test_pattern_rejects_four_digit_number() {
    let m = match_smtp_response("5501 is not a reply code");
    assert_eq!(m.smtp_code, None);
}

#[test]
fn test_find_ndr_code_first_match() {
    assert_eq!(
        find_ndr_code("failed (4.4.1 then 5.1.1)"),
        Some("4.4.1")
    );
    assert_eq!(find_ndr_code("5.7.1 blocked"), Some("5.7.1"));
    assert_eq!(find_ndr_code("no code here"), None);
}

// --- SMTP responses ---

#[test]
fn test_extract_multiline_smtp_response() {
    let reply = "550-5.1.1 The email account that you tried to reach does not exist.\r\n\
                 550-5.1.1 Please try double-checking the recipient's email address\r\n\
                 550 5.1.1 for typos or unnecessary spaces.";
    let extraction = BounceExtractor::default()
        .extract_from_smtp_response(reply)
        .unwrap();

    assert_eq!(extraction.smtp_code.as_deref(), Some("550"));
    assert_eq!(extraction.ndr_code.as_deref(), Some("5.1.1"));
    assert_eq!(
        extraction.detail,
        "The email account that you tried to reach does not exist."
    );
    assert_eq!(extraction.message, reply);
}

#[test]
fn test_extract_smtp_response_without_code_fails() {
    let err = BounceExtractor::default()
        .extract_from_smtp_response("Thanks for your message!")
        .unwrap_err();
    assert!(matches!(err, BounceError::Extraction(_)));
}

// --- NDR reports ---

#[test]
fn test_extract_ndr_prefers_diagnostic_code() {
    let extraction = BounceExtractor::default()
        .extract_from_ndr(NDR_REPORT)
        .unwrap();

    assert_eq!(extraction.smtp_code.as_deref(), Some("550"));
    assert_eq!(extraction.ndr_code.as_deref(), Some("5.1.1"));
    assert_eq!(
        extraction.detail,
        "<a@b.co>: Recipient address rejected: b.co"
    );
    assert_eq!(
        extraction.message,
        "smtp;550 5.1.1 <a@b.co>: Recipient address rejected: b.co"
    );
    assert_eq!(extraction.final_recipient.as_deref(), Some("a@b.co"));
    assert_eq!(extraction.action.as_deref(), Some("failed"));
    assert_eq!(extraction.reporting_mta.as_deref(), Some("mx.b.co"));
}

#[test]
fn test_extract_ndr_diagnostic_wins_over_disagreeing_status() {
    let report = "Final-Recipient: rfc822; a@b.co\n\
                  Action: delayed\n\
                  Status: 4.4.1\n\
                  Diagnostic-Code: smtp; 550 5.1.1 user unknown\n";
    let extraction = BounceExtractor::default().extract_from_ndr(report).unwrap();
    assert_eq!(extraction.ndr_code.as_deref(), Some("5.1.1"));
    assert_eq!(extraction.smtp_code.as_deref(), Some("550"));
}

#[test]
fn test_extract_ndr_status_fallback() {
    let report = "Final-Recipient: rfc822; a@b.co\r\nAction: failed\r\nStatus: 5.2.2 (mailbox full)\r\n";
    let extraction = BounceExtractor::default().extract_from_ndr(report).unwrap();

    assert_eq!(extraction.smtp_code, None);
    assert_eq!(extraction.ndr_code.as_deref(), Some("5.2.2"));
    assert_eq!(extraction.detail, "(mailbox full)");
    assert_eq!(extraction.message, "5.2.2 (mailbox full)");
}

#[test]
fn test_extract_ndr_diagnostic_without_code_uses_status() {
    let report = "Status: 4.4.1\nDiagnostic-Code: X-Postfix; connect to mx.b.co: Connection refused\n";
    let extraction = BounceExtractor::default().extract_from_ndr(report).unwrap();

    assert_eq!(extraction.ndr_code.as_deref(), Some("4.4.1"));
    assert_eq!(extraction.detail, "connect to mx.b.co: Connection refused");
    assert_eq!(
        extraction.message,
        "X-Postfix; connect to mx.b.co: Connection refused"
    );
}

#[test]
fn test_extract_ndr_folded_diagnostic() {
    let report = "Status: 5.1.1\r\n\
                  Diagnostic-Code: smtp; 550-5.1.1 The email account that you tried\r\n    \
                  to reach does not exist\r\n";
    let extraction = BounceExtractor::default().extract_from_ndr(report).unwrap();

    assert_eq!(extraction.smtp_code.as_deref(), Some("550"));
    assert!(extraction.detail.ends_with("to reach does not exist"));
}

#[test]
fn test_extract_ndr_without_fields_fails() {
    let err = BounceExtractor::default()
        .extract_from_ndr("Reporting-MTA: dns; mx.b.co\r\n\r\nAction: failed\r\n")
        .unwrap_err();
    assert!(matches!(err, BounceError::Extraction(_)));
}

const TWO_RECIPIENT_REPORT: &str = "Reporting-MTA: dns; mx.b.co\r\n\
                                    \r\n\
                                    Final-Recipient: rfc822; first@b.co\r\n\
                                    Action: delayed\r\n\
                                    Status: 4.2.2\r\n\
                                    \r\n\
                                    Final-Recipient: rfc822; second@b.co\r\n\
                                    Action: failed\r\n\
                                    Status: 5.1.1\r\n\
                                    Diagnostic-Code: smtp; 550 5.1.1 user unknown\r\n";

#[test]
fn test_extract_ndr_keeps_recipient_records_apart() {
    let extraction = BounceExtractor::default()
        .extract_from_ndr(TWO_RECIPIENT_REPORT)
        .unwrap();

    assert_eq!(extraction.final_recipient.as_deref(), Some("first@b.co"));
    assert_eq!(extraction.action.as_deref(), Some("delayed"));
    assert_eq!(extraction.ndr_code.as_deref(), Some("4.2.2"));
    assert_eq!(extraction.smtp_code, None);
    assert_eq!(extraction.message, "4.2.2");
    assert_eq!(extraction.reporting_mta.as_deref(), Some("mx.b.co"));
}

#[test]
fn test_extract_ndr_for_named_recipient() {
    let extractor = BounceExtractor::default();

    let second = extractor
        .extract_from_ndr_for(TWO_RECIPIENT_REPORT, Some("Second@b.co"))
        .unwrap();
    assert_eq!(second.final_recipient.as_deref(), Some("second@b.co"));
    assert_eq!(second.action.as_deref(), Some("failed"));
    assert_eq!(second.smtp_code.as_deref(), Some("550"));
    assert_eq!(second.ndr_code.as_deref(), Some("5.1.1"));
    assert_eq!(second.reporting_mta.as_deref(), Some("mx.b.co"));

    let unknown = extractor
        .extract_from_ndr_for(TWO_RECIPIENT_REPORT, Some("nobody@b.co"))
        .unwrap();
    assert_eq!(unknown.final_recipient.as_deref(), Some("first@b.co"));
}

#[test]
fn test_extract_ndr_does_not_borrow_codes_from_other_records() {
    let report = "Final-Recipient: rfc822; first@b.co\r\n\
                  Action: failed\r\n\
                  \r\n\
                  Final-Recipient: rfc822; second@b.co\r\n\
                  Status: 5.1.1\r\n";
    let err = BounceExtractor::default().extract_from_ndr(report).unwrap_err();
    assert!(matches!(err, BounceError::Extraction(_)));
}

// --- Full messages ---

#[test]
fn test_extract_from_message() {
    let raw = [
        "From: MAILER-DAEMON@mx.b.co",
        "Content-Type: multipart/report; report-type=delivery-status; boundary=\"x\"",
        "",
        "--x",
        "Content-Type: text/plain",
        "",
        "Delivery failed.",
        "--x",
        "Content-Type: message/delivery-status",
        "",
        "Reporting-MTA: dns; mx.b.co",
        "",
        "Final-Recipient: rfc822; a@b.co",
        "Action: failed",
        "Status: 5.1.1",
        "Diagnostic-Code: smtp; 550 5.1.1 user unknown",
        "--x--",
    ]
    .join("\r\n");

    let extraction = BounceExtractor::default().extract_from_message(&raw).unwrap();
    assert_eq!(extraction.smtp_code.as_deref(), Some("550"));
    assert_eq!(extraction.message, "smtp; 550 5.1.1 user unknown");
    assert_eq!(extraction.final_recipient.as_deref(), Some("a@b.co"));
}

#[test]
fn test_extract_from_message_without_report_fails() {
    let err = BounceExtractor::default()
        .extract_from_message("Subject: hi\r\n\r\n550 looks like a code but is not a report")
        .unwrap_err();
    assert!(matches!(err, BounceError::Extraction(_)));
}
