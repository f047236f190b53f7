use criterion::{criterion_group, criterion_main, Criterion};

use mboxfilter::filter::criteria::{self, Criterion as FilterCriterion};
use mboxfilter::filter::keys::{self, Selector};
use mboxfilter::filter::resolver::HeaderResolver;
use mboxfilter::parser::mime::parse_message;

const RAW: &[u8] = b"From alice@x.com Thu Apr  4 12:00:00 2013\n\
From: \"Alice A\" <alice@x.com>, \"Bob\" <bob@x.com>\n\
To: carol@y.org\n\
Date: Thu, 04 Apr 2013 10:00:00 +0000\n\
Message-ID: <m1@x.com>\n\
Subject: Quarterly report\n\
\n\
body\n";

fn bench_evaluate(c: &mut Criterion) {
    let resolver = HeaderResolver::new("ISO-8859-15", "%Y", 32);
    let message = parse_message(RAW, encoding_rs::WINDOWS_1252);
    let compiled = criteria::compile(&[
        FilterCriterion::new("From", "alice"),
        FilterCriterion::new("Subject", "report"),
    ])
    .unwrap();

    c.bench_function("evaluate_two_criteria", |b| {
        b.iter(|| criteria::evaluate(&compiled, &message, &resolver).unwrap())
    });
}

fn bench_generate_keys(c: &mut Criterion) {
    let resolver = HeaderResolver::new("ISO-8859-15", "%Y", 32);
    let message = parse_message(RAW, encoding_rs::WINDOWS_1252);
    let selectors = [
        Selector::new("From", None),
        Selector::new("Date", Some("%Y".into())),
    ];

    c.bench_function("generate_cartesian_keys", |b| {
        b.iter(|| {
            keys::generate(
                &selectors,
                &Default::default(),
                &message,
                &resolver,
                ".",
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_evaluate, bench_generate_keys);
criterion_main!(benches);
