use crate::api::Backend;
use crate::api::models::{AuthUser, ConversationRow};
use crate::services::conversations::ConversationList;
use gtk4 as gtk;
use gtk4::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Sidebar {
    root: gtk::Box,
    list: gtk::ListBox,
    rows: Rc<RefCell<Vec<ConversationRow>>>,
    task: RefCell<Option<tokio::task::JoinHandle<()>>>,
}

impl Sidebar {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);
        root.set_width_request(260);

        let title = gtk::Label::new(Some("Conversations"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        root.append(&title);

        let list = gtk::ListBox::new();
        list.set_placeholder(Some(&gtk::Label::new(Some("No chats found"))));
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .child(&list)
            .build();
        root.append(&scroller);

        Self {
            root,
            list,
            rows: Rc::new(RefCell::new(Vec::new())),
            task: RefCell::new(None),
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn set_items(&self, items: Vec<ConversationRow>) {
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        for conv in &items {
            let row = gtk::ListBoxRow::new();
            let cell = gtk::Box::new(gtk::Orientation::Vertical, 2);
            cell.set_margin_top(8);
            cell.set_margin_bottom(8);
            cell.set_margin_start(8);
            cell.set_margin_end(8);
            let title = gtk::Label::new(Some(&conv.title));
            title.set_halign(gtk::Align::Start);
            title.add_css_class("heading");
            let preview = gtk::Label::new(Some(&conv.preview));
            preview.set_halign(gtk::Align::Start);
            preview.set_ellipsize(gtk::pango::EllipsizeMode::End);
            preview.add_css_class("dim-label");
            cell.append(&title);
            cell.append(&preview);
            row.set_child(Some(&cell));
            self.list.append(&row);
        }
        *self.rows.borrow_mut() = items;
    }

    pub fn connect_open<F: Fn(ConversationRow) + 'static>(&self, on_open: F) {
        let rows = self.rows.clone();
        self.list.connect_row_activated(move |_, row| {
            let picked = usize::try_from(row.index())
                .ok()
                .and_then(|idx| rows.borrow().get(idx).cloned());
            if let Some(conv) = picked {
                on_open(conv);
            }
        });
    }

    /// Paints cached rows, then follows the live conversation list until the
    /// sidebar is dropped.
    pub fn watch(self: &Rc<Self>, backend: &Backend, me: AuthUser, overlay: &adw::ToastOverlay) {
        match crate::storage::open_default()
            .and_then(|conn| crate::storage::cached_rows(&conn, &me.uid, Some(200)))
        {
            Ok(cached) if !cached.is_empty() => self.set_items(cached),
            Ok(_) => {}
            Err(e) => log::warn!("could not read cached chats: {e}"),
        }

        let (tx, rx) = crate::utils::glib_channel();
        let store = backend.store.clone();
        let owner = me.uid.clone();
        let task = crate::utils::spawn_async(async move {
            let mut list = ConversationList::open(store, me);
            while let Some(update) = list.next().await {
                if tx.send(update).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.task.replace(Some(task)) {
            previous.abort();
        }

        let weak = Rc::downgrade(self);
        let overlay = overlay.clone();
        rx.attach(None, move |update| {
            let Some(sidebar) = weak.upgrade() else {
                return glib::ControlFlow::Break;
            };
            match update {
                Ok(rows) => {
                    let cached = crate::storage::open_default()
                        .and_then(|mut conn| crate::storage::replace_rows(&mut conn, &owner, &rows));
                    if let Err(e) = cached {
                        log::warn!("could not cache chats: {e}");
                    }
                    sidebar.set_items(rows);
                }
                Err(err) => {
                    overlay.add_toast(adw::Toast::new(&format!("Failed to load chats: {}", err)));
                }
            }
            glib::ControlFlow::Continue
        });
    }
}

impl Drop for Sidebar {
    fn drop(&mut self) {
        if let Some(task) = self.task.borrow_mut().take() {
            task.abort();
        }
    }
}
