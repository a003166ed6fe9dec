use std::collections::HashMap;

use neurograph_core::{
    feed::{feed_name, num_batches, prepare_datasets},
    Error,
};
use rstest::rstest;

#[test]
fn feed_names_follow_placeholder_outputs() {
    assert_eq!(feed_name("main", "In_0"), "main/In_0_main");
}

#[test]
fn datasets_are_split_by_prefix() {
    let data = HashMap::from([
        ("train_obs".to_string(), vec![1, 2]),
        ("valid_obs".to_string(), vec![3]),
        ("test_obs".to_string(), vec![4]),
    ]);
    let split = prepare_datasets("model", data).unwrap();
    assert_eq!(split.train["model/obs_main"], vec![1, 2]);
    assert_eq!(split.valid["model/obs_main"], vec![3]);
    assert_eq!(split.test["model/obs_main"], vec![4]);
}

#[rstest]
#[case("training_obs")]
#[case("obs")]
#[case("train_")]
fn bad_prefixes_are_rejected(#[case] key: &str) {
    let data = HashMap::from([(key.to_string(), 0)]);
    let err = prepare_datasets("main", data).unwrap_err();
    assert!(matches!(err, Error::DatasetKey(ref k) if k == key));
}

#[rstest]
#[case(100, 10, Some(10))]
#[case(101, 10, None)]
#[case(10, 0, None)]
fn batches_must_divide_the_samples(
    #[case] samples: usize,
    #[case] batch: usize,
    #[case] expected: Option<usize>,
) {
    match (num_batches(samples, batch), expected) {
        (Ok(n), Some(want)) => assert_eq!(n, want),
        (Err(e), None) => assert!(matches!(e.root(), Error::Msg(_))),
        (got, want) => panic!("got {got:?}, expected {want:?}"),
    }
}
