use super::*;
use std::sync::Mutex;

use tokio::sync::broadcast::error::TryRecvError;

#[derive(Default)]
struct RecordingSink {
    patches: Mutex<Vec<SettingsPatch>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.patches.lock().expect("lock").len()
    }

    fn last(&self) -> Option<SettingsPatch> {
        self.patches.lock().expect("lock").last().cloned()
    }
}

impl SettingsSink for RecordingSink {
    fn persist(&self, patch: SettingsPatch) {
        self.patches.lock().expect("lock").push(patch);
    }
}

#[derive(Default)]
struct FakeTransport {
    fail: bool,
    started: Mutex<Vec<Vec<QueueEntry>>>,
}

#[async_trait]
impl PlaybackTransport for FakeTransport {
    async fn start_queue(&self, queue: &[QueueEntry]) -> Result<(), PlaylistError> {
        if self.fail {
            return Err(PlaylistError::Status {
                url: "http://host/plugin/playlist/start".into(),
                status: 503,
            });
        }
        self.started.lock().expect("lock").push(queue.to_vec());
        Ok(())
    }
}

fn controller() -> (PlaylistController, Arc<RecordingSink>) {
    controller_with(FakeTransport::default()).0
}

#[allow(clippy::type_complexity)]
fn controller_with(
    transport: FakeTransport,
) -> (
    (PlaylistController, Arc<RecordingSink>),
    Arc<FakeTransport>,
) {
    let sink = Arc::new(RecordingSink::default());
    let transport = Arc::new(transport);
    let controller = PlaylistController::new(sink.clone(), transport.clone());
    ((controller, sink), transport)
}

fn local(path: &str) -> FileMetadata {
    FileMetadata::new(FileOrigin::Local, path)
}

fn entry(id: &str, file_name: &str) -> QueueEntry {
    QueueEntry {
        id: id.into(),
        file_name: file_name.into(),
        print_time: "00:00:00:00".into(),
    }
}

fn ids(controller: &PlaylistController) -> Vec<&str> {
    controller.queue().iter().map(|e| e.id.as_str()).collect()
}

fn set_queue(current_file: &str, remaining: usize) -> PluginMessage {
    PluginMessage::SetQueue {
        current_file: current_file.into(),
        playlist: (0..remaining)
            .map(|i| entry(&i.to_string(), "x.gcode"))
            .collect(),
    }
}

#[test]
fn duplicate_paths_get_distinct_ids() {
    let (mut controller, _sink) = controller();
    let first = controller.add_entry(&local("benchy.gcode")).clone();
    let second = controller.add_entry(&local("benchy.gcode")).clone();

    assert_ne!(first.id, second.id);
    assert_eq!(first.file_name, "benchy.gcode");
    assert_eq!(second.file_name, "benchy.gcode");
    assert_eq!(first.id, entry_id(FileOrigin::Local, "benchy.gcode", 0));
    assert_eq!(second.id, entry_id(FileOrigin::Local, "benchy.gcode", 1));
}

#[test]
fn add_entry_formats_print_time_and_persists_queue() {
    let (mut controller, sink) = controller();
    controller.add_entry(&local("cube.gcode").with_estimate(3661.0));

    assert_eq!(controller.queue()[0].print_time, "00:01:01:01");
    assert_eq!(sink.count(), 1);
    assert_eq!(
        sink.last().and_then(|p| p.playlist).map(|q| q.len()),
        Some(1)
    );
}

#[test]
fn moves_preserve_entries_and_stop_at_boundaries() {
    let (mut controller, sink) = controller();
    controller.hydrate(&PlaylistSettings {
        playlist: vec![entry("a", "a"), entry("b", "b"), entry("c", "c")],
        ..PlaylistSettings::default()
    });

    assert!(!controller.move_up(&entry("a", "a")));
    assert!(!controller.move_down(&entry("c", "c")));
    assert_eq!(sink.count(), 0);

    assert!(controller.move_up(&entry("c", "c")));
    assert_eq!(ids(&controller), vec!["a", "c", "b"]);
    assert!(controller.move_up(&entry("c", "c")));
    assert_eq!(ids(&controller), vec!["c", "a", "b"]);
    assert!(!controller.move_up(&entry("c", "c")));
    assert!(controller.move_down_at(1));
    assert_eq!(ids(&controller), vec!["c", "b", "a"]);

    let mut sorted: Vec<&str> = ids(&controller);
    sorted.sort_unstable();
    assert_eq!(sorted, vec!["a", "b", "c"]);
    assert_eq!(sink.count(), 3);
}

#[test]
fn moving_missing_entry_is_a_no_op() {
    let (mut controller, sink) = controller();
    controller.add_entry(&local("a.gcode"));
    assert!(!controller.move_up(&entry("ghost", "ghost.gcode")));
    assert!(!controller.move_down(&entry("ghost", "ghost.gcode")));
    assert!(!controller.remove_entry(&entry("ghost", "ghost.gcode")));
    assert!(!controller.remove_at(7));
    assert_eq!(sink.count(), 1);
}

#[test]
fn clear_empties_queue_of_any_size() {
    let (mut controller, sink) = controller();
    controller.clear();
    assert!(controller.queue().is_empty());

    for i in 0..5 {
        controller.add_entry(&local(&format!("part-{i}.gcode")));
    }
    controller.clear();
    assert!(controller.queue().is_empty());
    assert_eq!(sink.last(), Some(SettingsPatch::playlist(Vec::new())));
}

#[test]
fn completion_is_announced_once_when_queue_drains() {
    let (mut controller, _sink) = controller();
    let mut events = controller.subscribe_events();

    controller.reconcile(set_queue("a.gcode", 2));
    assert!(controller.is_playing());
    assert_eq!(controller.current_file(), "a.gcode");

    controller.reconcile(set_queue("a.gcode", 0));
    assert!(!controller.is_playing());

    let mut completions = 0;
    loop {
        match events.try_recv() {
            Ok(ControllerEvent::PlaylistCompleted) => completions += 1,
            Ok(_) => {}
            Err(TryRecvError::Empty) => break,
            Err(other) => panic!("unexpected receive error: {other:?}"),
        }
    }
    assert_eq!(completions, 1);

    controller.reconcile(set_queue("a.gcode", 0));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn draining_with_empty_current_file_is_silent() {
    let (mut controller, _sink) = controller();
    controller.reconcile(set_queue("", 1));
    let mut events = controller.subscribe_events();

    controller.reconcile(set_queue("", 0));
    assert!(!controller.is_playing());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn idle_empty_queue_does_not_announce_completion() {
    let (mut controller, _sink) = controller();
    let mut events = controller.subscribe_events();
    controller.reconcile(set_queue("a.gcode", 0));
    assert!(!controller.is_playing());
    assert_eq!(
        events.try_recv().expect("current file event"),
        ControllerEvent::CurrentFileChanged("a.gcode".into())
    );
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn file_removed_without_match_does_not_persist() {
    let (mut controller, sink) = controller();
    controller.hydrate(&PlaylistSettings {
        playlist: vec![entry("a", "a.gcode"), entry("b", "b.gcode")],
        ..PlaylistSettings::default()
    });
    let before = controller.queue().to_vec();

    controller.reconcile(PluginMessage::FileRemoved {
        removed_file: "zzz.gcode".into(),
        playlist: Vec::new(),
    });
    controller.reconcile(PluginMessage::FileRemoved {
        removed_file: String::new(),
        playlist: Vec::new(),
    });

    assert_eq!(controller.queue(), before.as_slice());
    assert_eq!(sink.count(), 0);
}

#[test]
fn file_removed_drops_every_copy_and_persists_once() {
    let (mut controller, sink) = controller();
    controller.add_entry(&local("a.gcode"));
    controller.add_entry(&local("b.gcode"));
    controller.add_entry(&local("a.gcode"));
    let persisted_before = sink.count();

    controller.reconcile(PluginMessage::FileRemoved {
        removed_file: "a.gcode".into(),
        playlist: Vec::new(),
    });

    assert_eq!(controller.file_names(), vec!["b.gcode"]);
    assert_eq!(sink.count(), persisted_before + 1);
}

#[test]
fn unknown_messages_change_nothing() {
    let (mut controller, sink) = controller();
    controller.add_entry(&local("a.gcode"));
    controller.reconcile(PluginMessage::Unknown);
    assert_eq!(controller.queue().len(), 1);
    assert!(!controller.is_playing());
    assert_eq!(sink.count(), 1);
}

#[test]
fn hydrate_move_remove_end_to_end() {
    let (mut controller, sink) = controller();
    let a = entry("a", "A.gcode");
    let b = entry("b", "B.gcode");
    let c = entry("c", "C.gcode");
    controller.hydrate(&PlaylistSettings {
        playlist: vec![a.clone(), b.clone(), c.clone()],
        ..PlaylistSettings::default()
    });
    assert_eq!(sink.count(), 0);

    controller.move_down(&a);
    assert_eq!(controller.queue(), &[b.clone(), a.clone(), c.clone()]);

    controller.remove_entry(&a);
    assert_eq!(controller.queue(), &[b, c]);
    assert_eq!(sink.count(), 2);
}

#[tokio::test]
async fn start_playback_sends_queue_and_marks_playing() {
    let ((mut controller, _sink), transport) = controller_with(FakeTransport::default());
    controller.add_entry(&local("a.gcode"));

    controller.start_playback().await.expect("start");

    assert!(controller.is_playing());
    let started = transport.started.lock().expect("lock").clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0], controller.queue());
}

#[tokio::test]
async fn failed_start_rolls_back_playing_flag() {
    let ((mut controller, _sink), _transport) = controller_with(FakeTransport {
        fail: true,
        ..FakeTransport::default()
    });
    controller.add_entry(&local("a.gcode"));

    let err = controller.start_playback().await.expect_err("should fail");
    assert!(matches!(err, PlaylistError::Status { status: 503, .. }));
    assert!(!controller.is_playing());
}

#[test]
fn preference_changes_persist_only_when_value_changes() {
    let (mut controller, sink) = controller();
    controller.set_auto_start_queue(false);
    controller.set_start_time("");
    assert_eq!(sink.count(), 0);

    controller.set_auto_repeat_queue(true);
    controller.set_start_time("06:30");
    assert_eq!(sink.count(), 2);
    assert_eq!(
        sink.last(),
        Some(SettingsPatch {
            start_time: Some("06:30".into()),
            ..SettingsPatch::default()
        })
    );
}

#[test]
fn remote_settings_overwrite_without_echo() {
    let (mut controller, sink) = controller();
    let remote = PlaylistSettings {
        auto_queue_files: true,
        start_time: "22:00".into(),
        ..PlaylistSettings::default()
    };

    assert!(controller.apply_remote_settings(&remote));
    assert!(!controller.apply_remote_settings(&remote));
    assert!(controller.preferences().auto_queue_files);
    assert_eq!(controller.preferences().start_time, "22:00");
    assert_eq!(sink.count(), 0);
}

#[test]
fn pushed_settings_update_preferences_once() {
    let (mut controller, sink) = controller();
    let mut events = controller.subscribe_events();
    let message = PluginMessage::SettingsUpdated {
        settings: PlaylistSettings {
            auto_repeat_queue: true,
            start_time: "06:30".into(),
            ..PlaylistSettings::default()
        },
    };

    controller.reconcile(message.clone());
    controller.reconcile(message);

    let Ok(ControllerEvent::PreferencesChanged(prefs)) = events.try_recv() else {
        panic!("expected a preferences event");
    };
    assert!(prefs.auto_repeat_queue);
    assert_eq!(prefs.start_time, "06:30");
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(controller.preferences(), &prefs);
    assert_eq!(sink.count(), 0);
}

#[test]
fn change_hooks_see_every_mutation_in_order() {
    let (mut controller, _sink) = controller();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    controller.on_change(move |mutation| recorder.lock().expect("lock").push(mutation.clone()));

    controller.add_entry(&local("a.gcode"));
    controller.set_auto_start_queue(true);
    controller.clear();

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[0], Mutation::Queue(q) if q.len() == 1));
    assert_eq!(seen[1], Mutation::AutoStartQueue(true));
    assert_eq!(seen[2], Mutation::Queue(Vec::new()));
}
