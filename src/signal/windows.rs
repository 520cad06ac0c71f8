use crate::config::CoordinatorConfig;
use crate::signal::{BroadcastSignal, ShowHandler};
use crate::{Error, InstanceKey};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use windows::core::{Error as WinError, HSTRING, PCWSTR};
use windows::Win32::Foundation::{
    ERROR_CLASS_ALREADY_EXISTS, HMODULE, HWND, LPARAM, LRESULT, WPARAM,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    GetWindowLongPtrW, PostMessageW, PostQuitMessage, RegisterClassW, RegisterWindowMessageW,
    SendMessageW, SetWindowLongPtrW, UnregisterClassW, CW_USEDEFAULT, GWLP_USERDATA,
    HWND_BROADCAST, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_APP, WNDCLASSW,
};

const EXIT_LOOP: u32 = WM_APP + 999;

/// A registered window message named after the instance key, broadcast to every top level
/// window of the desktop
pub struct PlatformSignal;

impl PlatformSignal {
    pub fn new(_config: &CoordinatorConfig) -> Self {
        PlatformSignal
    }
}

fn register_show_message(key: &InstanceKey) -> windows::core::Result<u32> {
    match unsafe { RegisterWindowMessageW(&HSTRING::from(key.as_str())) } {
        0 => Err(WinError::from_win32()),
        code => Ok(code),
    }
}

pub struct PlatformListener {
    thread: Option<JoinHandle<()>>,
    hwnd: HWND,
}

struct WindowData {
    show_msg_code: u32,
    handler: Arc<dyn ShowHandler>,
}

fn class_name(key: &InstanceKey) -> HSTRING {
    HSTRING::from(format!("lone_instance_{}", key))
}

/// Create a hidden top level window (message-only windows don't receive broadcasts)
///
/// The class outlives a listener only if unregistering it failed, so an existing class of the
/// same name is reused rather than treated as an error.
unsafe fn create_listener_window(
    class_name: &HSTRING,
    instance: HMODULE,
    window_data: &mut WindowData,
) -> windows::core::Result<HWND> {
    let window_class = WNDCLASSW {
        hInstance: instance.into(),
        lpszClassName: PCWSTR(class_name.as_ptr()),
        lpfnWndProc: Some(wndproc),
        ..Default::default()
    };
    if RegisterClassW(&window_class) == 0 {
        let e = WinError::from_win32();
        if e.code() != ERROR_CLASS_ALREADY_EXISTS.to_hresult() {
            return Err(e);
        }
        log::debug!("Reusing window class {}", class_name);
    }
    let hwnd = CreateWindowExW(
        WINDOW_EX_STYLE::default(),
        PCWSTR(class_name.as_ptr()),
        None,
        WINDOW_STYLE::default(),
        CW_USEDEFAULT,
        CW_USEDEFAULT,
        CW_USEDEFAULT,
        CW_USEDEFAULT,
        None,
        None,
        instance,
        None,
    );
    if hwnd.0 == 0 {
        return Err(WinError::from_win32());
    }
    SetWindowLongPtrW(hwnd, GWLP_USERDATA, window_data as *mut _ as isize);
    Ok(hwnd)
}

/// Fails while another window of the class is still alive, which is harmless
unsafe fn unregister_listener_class(class_name: &HSTRING, instance: HMODULE) {
    if let Err(e) = UnregisterClassW(PCWSTR(class_name.as_ptr()), instance) {
        log::debug!("Unable to unregister window class {}: {}", class_name, e);
    }
}

impl BroadcastSignal for PlatformSignal {
    type Listener = PlatformListener;

    fn register_listener(
        &self,
        key: &InstanceKey,
        handler: Arc<dyn ShowHandler>,
    ) -> Result<Self::Listener, Error> {
        let show_msg_code = register_show_message(key).map_err(|e| Error::unregistered(key, e))?;
        let (tx, rx) = sync_channel(0);
        let class_name = class_name(key);

        let thread = std::thread::Builder::new()
            .name("show-request-watcher".to_owned())
            .spawn(move || {
                let mut window_data = Box::new(WindowData {
                    show_msg_code,
                    handler,
                });
                let instance = match unsafe { GetModuleHandleW(None) } {
                    Ok(instance) => instance,
                    Err(e) => {
                        tx.send(Err(e)).ok();
                        return;
                    }
                };
                let created =
                    unsafe { create_listener_window(&class_name, instance, &mut window_data) };
                let hwnd = match created {
                    Ok(hwnd) => hwnd,
                    Err(e) => {
                        unsafe { unregister_listener_class(&class_name, instance) };
                        tx.send(Err(e)).ok();
                        return;
                    }
                };
                tx.send(Ok(hwnd)).ok();
                unsafe {
                    let mut message = MSG::default();
                    while GetMessageW(&mut message, hwnd, 0, 0).into() {
                        DispatchMessageW(&message);
                    }
                    DestroyWindow(hwnd).ok();
                    unregister_listener_class(&class_name, instance);
                }
                log::debug!("Show request watcher thread exiting");
            })
            .map_err(|e| Error::unregistered(key, e))?;

        let hwnd = match rx.recv() {
            Ok(Ok(hwnd)) => hwnd,
            Ok(Err(e)) => {
                thread.join().ok();
                return Err(Error::unregistered(key, e));
            }
            Err(e) => return Err(Error::unregistered(key, e)),
        };
        log::info!("Listening for show requests on {}", key);
        Ok(PlatformListener {
            thread: Some(thread),
            hwnd,
        })
    }

    fn send(&self, key: &InstanceKey) -> Result<(), Error> {
        let message = register_show_message(key).map_err(|e| Error::undelivered(key, e))?;
        // Posting returns immediately, unlike SendMessageW which would wait on every window
        unsafe { PostMessageW(HWND_BROADCAST, message, WPARAM(0), LPARAM(0)) }
            .map_err(|e| Error::undelivered(key, e))?;
        log::debug!("Broadcast show request for {}", key);
        Ok(())
    }
}

impl Drop for PlatformListener {
    fn drop(&mut self) {
        log::info!("Stopping show request watcher");
        unsafe { SendMessageW(self.hwnd, EXIT_LOOP, None, None) };
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

unsafe extern "system" fn wndproc(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let user_data = GetWindowLongPtrW(window, GWLP_USERDATA);
    if user_data != 0 {
        let window_data = &*(user_data as *const WindowData);
        match message {
            EXIT_LOOP => {
                PostQuitMessage(0);
            }
            msg if msg == window_data.show_msg_code => {
                log::info!("Show request received via broadcast message");
                window_data.handler.show_requested();
            }
            _ => {}
        }
    }
    DefWindowProcW(window, message, wparam, lparam)
}
