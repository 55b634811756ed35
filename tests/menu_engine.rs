//! Integration tests for the menu engine
//!
//! Drives the engine through a headless terminal with scripted keys.

use async_trait::async_trait;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use std::cell::Cell;
use std::rc::Rc;
use vlmsetup::errors::{Result, SetupError};
use vlmsetup::menu::{
    ActionContext, Engine, EngineOutcome, MenuAction, MenuKey, MenuNode, MenuResult,
    NavigationState, ScriptedInput, Status, StatusLevel, Terminal, INTERRUPTED_EXIT_CODE,
};

fn headless(keys: Vec<MenuKey>) -> Terminal {
    Terminal::headless(
        Box::new(ScriptedInput::new(keys)),
        Box::new(std::io::sink()),
        (80, 24),
    )
}

fn flag(key: &str) -> MenuNode {
    MenuNode::toggle(key, key, "", Rc::new(Cell::new(false)))
}

struct Counting(Rc<Cell<u32>>);

#[async_trait(?Send)]
impl MenuAction for Counting {
    async fn run(&self, _ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        self.0.set(self.0.get() + 1);
        Ok(MenuResult::Message(Status::success("counted")))
    }
}

struct Failing;

#[async_trait(?Send)]
impl MenuAction for Failing {
    async fn run(&self, _ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        Err(SetupError::Command {
            command: "uv sync".to_string(),
            reason: "resolution failed".to_string(),
        })
    }
}

struct Panicking;

#[async_trait(?Send)]
impl MenuAction for Panicking {
    async fn run(&self, _ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        panic!("action blew up");
    }
}

struct Fixed(MenuResult);

#[async_trait(?Send)]
impl MenuAction for Fixed {
    async fn run(&self, _ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        Ok(self.0.clone())
    }
}

#[quickcheck]
fn prop_navigation_wraps_circularly(len: u8, moves: Vec<bool>) -> TestResult {
    let len = (len % 20) as usize;
    if len == 0 {
        return TestResult::discard();
    }
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        (0..len).map(|i| flag(&format!("item{}", i))).collect(),
    );
    let mut nav = NavigationState::new(&root).unwrap();

    let mut sum: i64 = 0;
    for down in &moves {
        if *down {
            nav.move_down();
            sum += 1;
        } else {
            nav.move_up();
            sum -= 1;
        }
    }
    TestResult::from_bool(nav.selected_index() == sum.rem_euclid(len as i64) as usize)
}

#[test]
fn test_enter_then_back_restores_state() {
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![
            flag("a"),
            MenuNode::submenu("sub", "Sub", "", vec![flag("x"), flag("y"), flag("z")]),
            flag("b"),
        ],
    );
    let mut nav = NavigationState::new(&root).unwrap();
    nav.move_down();
    let before = nav.clone();

    assert!(nav.enter());
    assert_eq!(nav.depth(), 2);
    nav.move_down();
    nav.move_down();
    assert!(nav.back());

    assert_eq!(nav, before);
    assert!(!nav.back());
}

#[tokio::test]
async fn test_action_error_is_inline_and_sticky() {
    let counter = Rc::new(Cell::new(0));
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![
            MenuNode::action("fail", "Failing", "", Failing),
            MenuNode::action("count", "Count", "", Counting(counter.clone())),
        ],
    );
    let keys = vec![MenuKey::Confirm, MenuKey::Down, MenuKey::Confirm, MenuKey::Back];
    let mut engine = Engine::new(headless(keys), "Test");

    let outcome = engine.run(&root).await.unwrap();

    // The engine survived the error and kept serving keys
    assert_eq!(counter.get(), 1);
    assert_eq!(outcome, EngineOutcome::Exit(1));
}

#[tokio::test]
async fn test_action_error_status_text() {
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![MenuNode::action("fail", "Failing", "", Failing)],
    );
    let mut engine = Engine::new(headless(vec![MenuKey::Confirm, MenuKey::Back]), "Test");
    engine.run(&root).await.unwrap();

    let status = engine.status().unwrap();
    assert_eq!(status.level, StatusLevel::Error);
    assert_eq!(status.summary, "Failing failed");
    assert!(status.detail.as_deref().unwrap().contains("resolution failed"));
}

#[tokio::test]
async fn test_panic_is_caught_and_navigation_preserved() {
    let counter = Rc::new(Cell::new(0));
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![
            flag("first"),
            MenuNode::action("boom", "Boom", "", Panicking),
            MenuNode::action("count", "Count", "", Counting(counter.clone())),
        ],
    );
    let keys = vec![
        MenuKey::Down,
        MenuKey::Confirm,
        MenuKey::Down,
        MenuKey::Confirm,
        MenuKey::Back,
    ];
    let mut engine = Engine::new(headless(keys), "Test");

    let outcome = engine.run(&root).await.unwrap();

    assert_eq!(counter.get(), 1);
    assert_eq!(outcome, EngineOutcome::Exit(1));
}

#[tokio::test]
async fn test_restart_result_ends_loop() {
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![MenuNode::action("fix", "Fix", "", Fixed(MenuResult::Restart))],
    );
    let mut engine = Engine::new(headless(vec![MenuKey::Confirm]), "Test");
    assert_eq!(engine.run(&root).await.unwrap(), EngineOutcome::Restart);
}

#[tokio::test]
async fn test_fatal_result_exits_with_code() {
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![MenuNode::action("fatal", "Fatal", "", Fixed(MenuResult::Fatal(3)))],
    );
    let mut engine = Engine::new(headless(vec![MenuKey::Confirm]), "Test");
    assert_eq!(engine.run(&root).await.unwrap(), EngineOutcome::Exit(3));
}

#[tokio::test]
async fn test_toggle_flips_shared_state() {
    let state = Rc::new(Cell::new(false));
    let root = MenuNode::submenu(
        "root",
        "Root",
        "",
        vec![MenuNode::submenu(
            "settings",
            "Settings",
            "",
            vec![MenuNode::toggle("t", "Confirm heavy repairs", "", state.clone())],
        )],
    );
    let keys = vec![
        MenuKey::Open,
        MenuKey::Select,
        MenuKey::Back,
        MenuKey::Back,
    ];
    let mut engine = Engine::new(headless(keys), "Test");

    assert_eq!(engine.run(&root).await.unwrap(), EngineOutcome::Exit(0));
    assert!(state.get());
}

#[tokio::test]
async fn test_back_at_root_exits_clean() {
    let root = MenuNode::submenu("root", "Root", "", vec![flag("only")]);
    let mut engine = Engine::new(headless(vec![MenuKey::Down, MenuKey::Back]), "Test");
    assert_eq!(engine.run(&root).await.unwrap(), EngineOutcome::Exit(0));
}

#[tokio::test]
async fn test_quit_exits_interrupted() {
    let root = MenuNode::submenu("root", "Root", "", vec![flag("only")]);
    let mut engine = Engine::new(headless(vec![MenuKey::Quit]), "Test");
    assert_eq!(
        engine.run(&root).await.unwrap(),
        EngineOutcome::Exit(INTERRUPTED_EXIT_CODE)
    );
}
