use regwalk::domain::{
    CancellationToken, CollectingReporter, Diagnostic, EnumerateError, Enumerator, Hive, KeyQuery,
    KeyRecord, Severity, local_machine_name,
};
use regwalk::infrastructure::MemoryProvider;
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

fn fleet(hosts: &[&str]) -> MemoryProvider {
    let provider = MemoryProvider::new();
    for host in hosts {
        provider.add_key(host, Hive::LocalMachine, "SOFTWARE\\Vendor\\App1");
        provider.add_key(host, Hive::LocalMachine, "SOFTWARE\\Vendor\\App2");
    }
    provider
}

fn hosts_of(records: &[KeyRecord]) -> Vec<&str> {
    records.iter().map(|r| r.computer_name.as_str()).collect()
}

#[test]
fn unreachable_host_does_not_abort_the_batch() {
    let provider = fleet(&["h1", "h2"]);
    let reporter = CollectingReporter::new();
    let probe = |host: &str| host != "h1";
    let enumerator = Enumerator::new(&provider, &reporter).with_probe(&probe);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h1", "h2"]);

    let records: Vec<KeyRecord> = enumerator.enumerate(&query).collect();

    assert_eq!(hosts_of(&records), ["h2", "h2"]);
    let diagnostics = reporter.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].host, "h1");
    assert_eq!(diagnostics[0].severity(), Severity::Warning);
    assert_eq!(provider.stats().connections_opened(), 1);
}

#[test]
fn failed_connection_is_reported_per_host() {
    let provider = fleet(&["h1", "h2", "h3"]);
    provider.set_offline("h2", true);
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h1", "h2", "h3"]);

    let records: Vec<KeyRecord> = enumerator.enumerate(&query).collect();

    assert_eq!(hosts_of(&records), ["h1", "h1", "h3", "h3"]);
    let diagnostics = reporter.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        &diagnostics[0].error,
        EnumerateError::Connection { host, hive: Hive::LocalMachine, .. } if host == "h2"
    ));
    assert!(provider.stats().is_balanced());
}

#[test]
fn missing_start_key_on_one_host_is_isolated() {
    let provider = fleet(&["h1"]);
    provider.add_key("h2", Hive::LocalMachine, "SOFTWARE\\Other");
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h2", "h1"]);

    let records: Vec<KeyRecord> = enumerator.enumerate(&query).collect();

    assert_eq!(hosts_of(&records), ["h1", "h1"]);
    assert_eq!(
        reporter.diagnostics(),
        [Diagnostic::new(
            "h2",
            EnumerateError::KeyNotFound {
                path: "SOFTWARE\\Vendor".to_owned()
            }
        )]
    );
    assert!(provider.stats().is_balanced());
}

#[test]
fn one_connection_is_open_at_a_time() {
    let provider = fleet(&["h1", "h2"]);
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h1", "h2"]);
    let mut records = enumerator.enumerate(&query);

    records.next();
    records.next();
    assert_eq!(provider.stats().connections_opened(), 1);

    records.next();
    assert_eq!(provider.stats().connections_opened(), 2);
    assert_eq!(provider.stats().connections_closed(), 1);

    drop(records);
    assert!(provider.stats().is_balanced());
}

#[test]
fn parallel_enumeration_keeps_hosts_grouped_in_input_order() {
    let hosts = ["h1", "h2", "h3", "h4", "h5"];
    let provider = fleet(&hosts);
    provider.set_offline("h3", true);
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&hosts);

    let records = enumerator.enumerate_parallel(&query, 2);

    assert_eq!(
        hosts_of(&records),
        ["h1", "h1", "h2", "h2", "h4", "h4", "h5", "h5"]
    );
    assert_eq!(reporter.diagnostics().len(), 1);
    assert!(provider.stats().is_balanced());
}

#[test]
fn free_workers_take_the_next_host_while_one_is_slow() {
    let hosts = ["slow", "a", "b", "c"];
    let provider = fleet(&hosts);
    let reporter = CollectingReporter::new();
    let finished = Mutex::new(Vec::new());
    let probe = |host: &str| {
        if host == "slow" {
            thread::sleep(Duration::from_millis(300));
        }
        finished.lock().unwrap().push(host.to_owned());
        true
    };
    let enumerator = Enumerator::new(&provider, &reporter).with_probe(&probe);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&hosts);

    let records = enumerator.enumerate_parallel(&query, 2);

    assert_eq!(
        hosts_of(&records),
        ["slow", "slow", "a", "a", "b", "b", "c", "c"]
    );
    let order = finished.into_inner().unwrap();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last().map(String::as_str), Some("slow"));
}

#[test]
fn empty_host_list_and_blank_hosts_mean_this_machine() {
    let local = local_machine_name();
    let provider = fleet(&[local.as_str()]);
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);

    let unset: Vec<KeyRecord> = enumerator
        .enumerate(&KeyQuery::new("SOFTWARE\\Vendor"))
        .collect();
    let blank: Vec<KeyRecord> = enumerator
        .enumerate(&KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&[""]))
        .collect();

    assert_eq!(unset.len(), 2);
    assert!(unset.iter().all(|r| r.computer_name == local));
    assert_eq!(blank, unset);
    assert!(reporter.diagnostics().is_empty());
}

#[test]
fn parallel_and_sequential_agree() {
    let hosts = ["a", "b", "c"];
    let provider = fleet(&hosts);
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("SOFTWARE")
        .with_hosts(&hosts)
        .with_recurse(true);

    let sequential: Vec<KeyRecord> = enumerator.enumerate(&query).collect();
    let parallel = enumerator.enumerate_parallel(&query, 8);

    assert_eq!(sequential, parallel);
}

#[test]
fn cancelled_batch_reports_once_and_stops() {
    let provider = fleet(&["h1", "h2", "h3"]);
    let reporter = CollectingReporter::new();
    let cancel = CancellationToken::new();
    let enumerator = Enumerator::new(&provider, &reporter).with_cancellation(cancel.clone());
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h1", "h2", "h3"]);
    let mut records = enumerator.enumerate(&query);

    assert!(records.next().is_some());
    cancel.cancel();
    assert!(records.next().is_none());
    assert!(records.next().is_none());
    drop(records);

    let diagnostics = reporter.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].error, EnumerateError::Cancelled);
    assert_eq!(provider.stats().connections_opened(), 1);
    assert!(provider.stats().is_balanced());
}

#[test]
fn cancelled_parallel_batch_connects_nowhere() {
    let provider = fleet(&["h1", "h2"]);
    let reporter = CollectingReporter::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let enumerator = Enumerator::new(&provider, &reporter).with_cancellation(cancel);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["h1", "h2"]);

    let records = enumerator.enumerate_parallel(&query, 4);

    assert!(records.is_empty());
    assert_eq!(reporter.diagnostics().len(), 1);
    assert_eq!(provider.stats().connections_opened(), 0);
}

#[test]
fn diagnostics_can_be_sent_over_a_channel() {
    let provider = fleet(&["h1"]);
    let (sender, receiver) = mpsc::channel::<Diagnostic>();
    let enumerator = Enumerator::new(&provider, &sender);
    let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["ghost", "h1"]);

    let count = enumerator.enumerate(&query).count();
    drop(enumerator);
    drop(sender);

    assert_eq!(count, 2);
    let diagnostics: Vec<Diagnostic> = receiver.iter().collect();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].host, "ghost");
}

#[test]
fn hive_selects_the_tree() {
    let provider = fleet(&["h1"]);
    provider.add_key("h1", Hive::CurrentUser, "Environment");
    let reporter = CollectingReporter::new();
    let enumerator = Enumerator::new(&provider, &reporter);
    let query = KeyQuery::new("")
        .with_hosts(&["h1"])
        .with_hive(Hive::CurrentUser);

    let records: Vec<KeyRecord> = enumerator.enumerate(&query).collect();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, "Environment");
    assert_eq!(records[0].hive, Hive::CurrentUser);
}
