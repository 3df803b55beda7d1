use crate::api::Backend;
use crate::api::models::AuthUser;
use crate::services::auth_form::sign_out;
use crate::services::conversations::open_or_create_chat;
use crate::ui::chat_view::ChatView;
use crate::ui::sidebar::Sidebar;
use adw::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

/// Signed-in page: conversation sidebar beside the open chat.
pub struct MainPage {
    root: gtk4::Box,
    _sidebar: Rc<Sidebar>,
    chat: Rc<RefCell<Option<ChatView>>>,
}

impl MainPage {
    pub fn new(window: &adw::ApplicationWindow, backend: &Backend, me: AuthUser) -> Self {
        let overlay = adw::ToastOverlay::new();

        let split = adw::Flap::builder()
            .reveal_flap(true)
            .locked(true)
            .modal(false)
            .build();

        let sidebar = Rc::new(Sidebar::new());
        split.set_flap(Some(&sidebar.widget()));

        let content = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        content.set_hexpand(true);
        let placeholder = gtk4::Label::new(Some("Select a conversation or start a new chat."));
        placeholder.add_css_class("dim-label");
        placeholder.set_vexpand(true);
        content.append(&placeholder);
        split.set_content(Some(&content));
        overlay.set_child(Some(&split));

        let root = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        let header = adw::HeaderBar::new();
        let title = gtk4::Label::new(Some(&format!("Firechat · {}", me.email)));
        header.set_title_widget(Some(&title));

        let new_chat_btn = gtk4::Button::with_label("New Chat");
        new_chat_btn.add_css_class("suggested-action");
        header.pack_end(&new_chat_btn);
        let logout_btn = gtk4::Button::with_label("Log out");
        header.pack_start(&logout_btn);
        root.append(&header);
        root.append(&overlay);

        let chat: Rc<RefCell<Option<ChatView>>> = Rc::new(RefCell::new(None));

        // Replaces the open chat; the previous view's live query ends with it.
        let open_chat: Rc<dyn Fn(&str, &str)> = {
            let backend = backend.clone();
            let me = me.clone();
            let chat = chat.clone();
            let content = content.clone();
            let overlay = overlay.clone();
            Rc::new(move |chat_id: &str, title: &str| {
                while let Some(child) = content.first_child() {
                    content.remove(&child);
                }
                let view = ChatView::new(&backend, me.clone(), chat_id, title, &overlay);
                content.append(&view.widget());
                *chat.borrow_mut() = Some(view);
            })
        };

        {
            let open_chat = open_chat.clone();
            sidebar.connect_open(move |row| open_chat(&row.chat_id, &row.title));
        }
        sidebar.watch(backend, me.clone(), &overlay);

        {
            let window = window.clone();
            let backend = backend.clone();
            let overlay = overlay.clone();
            let open_chat = open_chat.clone();
            let me = me.clone();
            new_chat_btn.connect_clicked(move |_| {
                let backend_for_pick = backend.clone();
                let overlay = overlay.clone();
                let open_chat = open_chat.clone();
                let me = me.clone();
                crate::ui::search::show_search_dialog(&window, &backend, move |user| {
                    let store = backend_for_pick.store.clone();
                    let my_uid = me.uid.clone();
                    let recipient = user.id.clone();
                    let rx = crate::utils::run_async_to_main(async move {
                        open_or_create_chat(store.as_ref(), &my_uid, &recipient).await
                    });
                    let overlay = overlay.clone();
                    let open_chat = open_chat.clone();
                    let title = user.display_name().to_string();
                    rx.attach(None, move |res| {
                        match res {
                            Ok(chat_id) => open_chat(&chat_id, &title),
                            Err(err) => overlay.add_toast(adw::Toast::new(&format!(
                                "Failed to create chat: {}",
                                err
                            ))),
                        }
                        glib::ControlFlow::Break
                    });
                });
            });
        }

        {
            let backend = backend.clone();
            let overlay = overlay.clone();
            logout_btn.connect_clicked(move |_| {
                let backend = backend.clone();
                let rx = crate::utils::run_async_to_main(async move { sign_out(&backend).await });
                let overlay = overlay.clone();
                rx.attach(None, move |res| {
                    match res {
                        Ok(()) => log::info!("User logged out"),
                        Err(err) => overlay.add_toast(adw::Toast::new(&err.to_string())),
                    }
                    glib::ControlFlow::Break
                });
            });
        }

        Self {
            root,
            _sidebar: sidebar,
            chat,
        }
    }

    pub fn widget(&self) -> gtk4::Widget {
        self.root.clone().upcast()
    }
}

impl Drop for MainPage {
    fn drop(&mut self) {
        self.chat.borrow_mut().take();
    }
}
