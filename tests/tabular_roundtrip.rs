#![allow(clippy::unwrap_used, clippy::expect_used)]

use invoice_ledger::{Column, ColumnOrder, InvoiceRecord, TabularCodec};
use proptest::prelude::*;
use tempfile::tempdir;

fn text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9äöüß ,;.\"'/\\-\n]{0,24}"
}

fn cents() -> impl Strategy<Value = f64> {
    (-10_000_000i64..10_000_000).prop_map(|c| c as f64 / 100.0)
}

prop_compose! {
    fn arb_record()(
        company in text(),
        invoice_number in text(),
        comment in text(),
        invoice_date in "[0-3][0-9]\\.[01][0-9]\\.20[0-9]{2}",
        net_amount in cents(),
        tax_amount in cents(),
        gross_amount in cents(),
        account in 0i64..100_000,
        partial_payment in any::<bool>(),
        has_attachments in any::<bool>(),
    ) -> InvoiceRecord {
        InvoiceRecord {
            filename: "doc.pdf".into(),
            company,
            invoice_number,
            comment,
            invoice_date,
            net_amount,
            tax_amount,
            gross_amount,
            account,
            partial_payment,
            has_attachments,
            currency: "EUR".into(),
            ..Default::default()
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rewritten_files_load_back_unchanged(
        records in prop::collection::vec(arb_record(), 0..8),
        columns in Just(Column::ALL.to_vec()).prop_shuffle(),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoices.csv");
        let codec = TabularCodec::new(ColumnOrder::from_columns(columns));

        codec.rewrite(&path, &records).unwrap();
        let loaded = codec.load(&path).unwrap();
        prop_assert_eq!(loaded, records);
    }
}
