use pagemark_core::annotation::{Annotation, Stroke};
use pagemark_core::config::AnnotatorConfig;
use pagemark_core::coords::{DocPoint, DocRect};
use pagemark_core::session::PageSession;
use pagemark_core::store::AnnotationStore;
use pagemark_storage::FileStore;
use std::sync::Arc;

fn open_session(root: &std::path::Path) -> PageSession {
    let store: Arc<dyn AnnotationStore> = Arc::new(FileStore::open(root).unwrap());
    PageSession::open("paper.pdf", 3, None, store, &AnnotatorConfig::default()).unwrap()
}

#[test]
fn committed_annotations_reload_in_a_new_session() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    let mut session = open_session(temp.path());
    session
        .commit(Annotation::highlight(1, DocRect::new(72.0, 90.0, 200.0, 14.0), "Intro", Stroke::highlight()))
        .unwrap();
    session.commit(Annotation::note(2, DocPoint::new(300.0, 400.0), "check this")).unwrap();
    drop(session);

    let reloaded = open_session(temp.path());
    assert_eq!(reloaded.visible().len(), 2);
    assert_eq!(reloaded.visible_on_page(2)[0].text(), Some("check this"));
}

#[test]
fn erased_annotation_stays_gone_after_reload() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    let mut session = open_session(temp.path());
    let stored = session
        .commit(Annotation::ink(
            1,
            vec![DocPoint::new(10.0, 10.0), DocPoint::new(40.0, 30.0)],
            Stroke::ink(),
        ))
        .unwrap();
    assert!(session.erase(&stored).unwrap());
    drop(session);

    assert!(open_session(temp.path()).visible().is_empty());
}
